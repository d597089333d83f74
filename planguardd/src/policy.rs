// ABOUTME: enforces allow/deny/confirm policies over requested actions before execution.
// ABOUTME: the policy tables are plain data and the decision is a pure function of action, mode and tables.

use std::path::{Component, Path, PathBuf};

use planguard_protocol::{Action, ActionError, ActionErrorCode, ExecAction, Mode, WriteFileAction};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::actions::files::parse_mode;

/// Authorization tables, loadable from TOML. Omitted keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Absolute directory that file actions may touch without confirmation.
    /// Relative paths in actions are resolved against it.
    pub safe_root: PathBuf,
    /// Programs that run without confirmation. Matched against argv[0] literally.
    pub exec_allowlist: Vec<String>,
    /// Programs that always need confirmation, even if allowlisted.
    pub exec_confirm: Vec<String>,
    /// Programs that are never run, confirmation or not.
    pub exec_deny: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            safe_root: PathBuf::from("/var/lib/planguardd/work"),
            exec_allowlist: list(&["/bin/echo", "echo"]),
            exec_confirm: list(&["/bin/rm", "/usr/bin/rm", "rm"]),
            exec_deny: list(&[
                "/bin/dd",
                "/usr/bin/dd",
                "dd",
                "/sbin/mkfs",
                "/sbin/mkfs.ext4",
                "/usr/sbin/mkfs",
                "/usr/sbin/mkfs.ext4",
                "mkfs",
                "mkfs.ext4",
                "/sbin/shutdown",
                "/usr/sbin/shutdown",
                "shutdown",
                "/sbin/reboot",
                "/usr/sbin/reboot",
                "reboot",
            ]),
        }
    }
}

impl PolicyConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: PolicyConfig = toml::from_str(s)?;
        if !config.safe_root.is_absolute() {
            anyhow::bail!("policy safe_root must be an absolute path");
        }
        Ok(config)
    }

    /// Where a file action's path actually lands.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.safe_root.join(p)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Denied,
    ConfirmationRequired,
}

pub fn decide(action: &Action, mode: Mode, policy: &PolicyConfig) -> PolicyDecision {
    let decision = static_decision(action, policy);
    match (mode, decision) {
        // nothing runs in plan_only, so there is nothing to confirm
        (Mode::PlanOnly, PolicyDecision::ConfirmationRequired) => PolicyDecision::Allowed,
        _ => decision,
    }
}

fn static_decision(action: &Action, policy: &PolicyConfig) -> PolicyDecision {
    match action {
        Action::Ping(_) => PolicyDecision::Allowed,
        Action::Exec(exec) => exec_decision(exec, policy),
        Action::ReadFile(read) => path_decision(&read.path, policy),
        Action::WriteFile(write) => write_decision(write, policy),
        Action::ServiceControl(_)
        | Action::InstallPackages(_)
        | Action::RemovePackages(_)
        | Action::UpdateSystem(_)
        | Action::Observe(_)
        | Action::CgroupApply(_)
        | Action::FirmwareOp(_) => PolicyDecision::Allowed,
    }
}

fn exec_decision(exec: &ExecAction, policy: &PolicyConfig) -> PolicyDecision {
    let program = match exec.argv.first() {
        Some(p) => p.as_str(),
        None => return PolicyDecision::Denied,
    };

    if program_listed(program, &policy.exec_deny) {
        return PolicyDecision::Denied;
    }
    if program_listed(program, &policy.exec_confirm) {
        return PolicyDecision::ConfirmationRequired;
    }
    if policy.exec_allowlist.iter().any(|p| p == program) {
        return PolicyDecision::Allowed;
    }
    PolicyDecision::ConfirmationRequired
}

/// Deny and confirm lists also match on the program's file name, so
/// `/usr/local/bin/dd` is caught by a `dd` entry.
fn program_listed(program: &str, list: &[String]) -> bool {
    let base = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    list.iter().any(|p| p == program || p == base)
}

fn path_decision(path: &str, policy: &PolicyConfig) -> PolicyDecision {
    if path_requires_confirmation(path, &policy.safe_root) {
        PolicyDecision::ConfirmationRequired
    } else {
        PolicyDecision::Allowed
    }
}

/// Setuid and setgid files need confirmation even inside the safe root. An
/// unparseable mode falls through so the writer reports it.
fn write_decision(write: &WriteFileAction, policy: &PolicyConfig) -> PolicyDecision {
    let decision = path_decision(&write.path, policy);
    let privileged = parse_mode(&write.mode).is_ok_and(|mode| mode & 0o6000 != 0);
    if decision == PolicyDecision::Allowed && privileged {
        return PolicyDecision::ConfirmationRequired;
    }
    decision
}

pub fn path_requires_confirmation(path: &str, safe_root: &Path) -> bool {
    let p = Path::new(path);
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return true;
    }
    p.is_absolute() && !p.starts_with(safe_root)
}

/// Turns a decision into the outcome for this request's confirmation token.
pub fn resolve(
    decision: PolicyDecision,
    token: Option<&str>,
    expected_token: Option<&str>,
) -> Result<(), ActionError> {
    match decision {
        PolicyDecision::Allowed => Ok(()),
        PolicyDecision::Denied => Err(ActionError::new(
            ActionErrorCode::PolicyDenied,
            "denied by policy",
        )),
        PolicyDecision::ConfirmationRequired => {
            if confirmation_is_valid(token, expected_token) {
                Ok(())
            } else {
                Err(ActionError::new(
                    ActionErrorCode::ConfirmationRequired,
                    "confirmation required",
                ))
            }
        }
    }
}

pub fn confirmation_is_valid(token: Option<&str>, expected_token: Option<&str>) -> bool {
    match (token, expected_token) {
        (Some(t), Some(expected)) if !expected.is_empty() => {
            t.as_bytes().ct_eq(expected.as_bytes()).into()
        }
        _ => false,
    }
}
