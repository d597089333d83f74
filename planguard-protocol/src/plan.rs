// ABOUTME: defines the closed request schema: the action plan envelope and every action variant.
// ABOUTME: every struct rejects unknown fields so invented keys fail parsing instead of being ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    PlanOnly,
    Execute,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::PlanOnly => "plan_only",
            Mode::Execute => "execute",
        }
    }

    pub fn from_wire(value: &str) -> Option<Mode> {
        match value {
            "plan_only" => Some(Mode::PlanOnly),
            "execute" => Some(Mode::Execute),
            _ => None,
        }
    }
}

/// The request envelope.
///
/// `mode` stays a raw string here; the validator turns it into [`Mode`] so an
/// unrecognized value is reported as `invalid_mode` rather than a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ActionPlan {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub version: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<Confirmation>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Confirmation {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Exec(ExecAction),
    ReadFile(ReadFileAction),
    WriteFile(WriteFileAction),
    ServiceControl(ServiceControlAction),
    InstallPackages(PackagesAction),
    RemovePackages(PackagesAction),
    UpdateSystem(UpdateSystemAction),
    Observe(ObserveAction),
    CgroupApply(CgroupApplyAction),
    FirmwareOp(FirmwareOpAction),
    Ping(PingAction),
}

impl Action {
    /// The wire tag of this action.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Exec(_) => "exec",
            Action::ReadFile(_) => "read_file",
            Action::WriteFile(_) => "write_file",
            Action::ServiceControl(_) => "service_control",
            Action::InstallPackages(_) => "install_packages",
            Action::RemovePackages(_) => "remove_packages",
            Action::UpdateSystem(_) => "update_system",
            Action::Observe(_) => "observe",
            Action::CgroupApply(_) => "cgroup_apply",
            Action::FirmwareOp(_) => "firmware_op",
            Action::Ping(_) => "ping",
        }
    }

    pub fn danger(&self) -> Option<&str> {
        match self {
            Action::Exec(a) => a.danger.as_deref(),
            Action::ReadFile(a) => a.danger.as_deref(),
            Action::WriteFile(a) => a.danger.as_deref(),
            Action::ServiceControl(a) => a.danger.as_deref(),
            Action::InstallPackages(a) | Action::RemovePackages(a) => a.danger.as_deref(),
            Action::UpdateSystem(a) => a.danger.as_deref(),
            Action::Observe(a) => a.danger.as_deref(),
            Action::CgroupApply(a) => a.danger.as_deref(),
            Action::FirmwareOp(a) => a.danger.as_deref(),
            Action::Ping(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecAction {
    pub argv: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    pub timeout_sec: u64,
    #[serde(default)]
    pub as_root: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReadFileAction {
    pub path: String,
    pub max_bytes: u64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WriteFileAction {
    pub path: String,
    pub content: String,
    pub mode: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceControlVerb {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
    Status,
}

impl ServiceControlVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceControlVerb::Start => "start",
            ServiceControlVerb::Stop => "stop",
            ServiceControlVerb::Restart => "restart",
            ServiceControlVerb::Enable => "enable",
            ServiceControlVerb::Disable => "disable",
            ServiceControlVerb::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceControlAction {
    pub action: ServiceControlVerb,
    pub unit: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    Apt,
    Dnf,
    Pacman,
    Zypper,
    Brew,
}

/// Shared shape of `install_packages` and `remove_packages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackagesAction {
    pub manager: PackageManager,
    pub packages: Vec<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpdateSystemAction {
    pub manager: PackageManager,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObserveTool {
    Ps,
    Top,
    Journalctl,
    Perf,
    Bpftrace,
}

impl ObserveTool {
    pub fn program(self) -> &'static str {
        match self {
            ObserveTool::Ps => "ps",
            ObserveTool::Top => "top",
            ObserveTool::Journalctl => "journalctl",
            ObserveTool::Perf => "perf",
            ObserveTool::Bpftrace => "bpftrace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ObserveAction {
    pub tool: ObserveTool,
    pub args: Vec<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CgroupApplyAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_max_bytes: Option<u64>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareOp {
    Inventory,
    FwupdUpdate,
    UefiVarRead,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FirmwareOpAction {
    pub op: FirmwareOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uefi_var_name: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PingAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
