// ABOUTME: describes actions without running them: plan_only previews and deferred capabilities.
// ABOUTME: deferred kinds report the exact command lines they would run with executed=false.

use planguard_protocol::{
    Action, ActionResult, CgroupApplyAction, ExecResult, FirmwareOp, FirmwareOpAction,
    ObserveAction, PackageManager, PackagesAction, PlannedResult, PongResult, ReadFileResult,
    ServiceControlAction, UpdateSystemAction, WriteFileResult,
};

const EFIVARS_DIR: &str = "/sys/firmware/efi/efivars";

/// Result for an authorized action that will not be run by this request.
pub fn describe(action: &Action) -> ActionResult {
    match action {
        Action::Exec(_) => ActionResult::Exec(ExecResult {
            ok: true,
            exit_code: None,
            stdout: String::new(),
            stdout_truncated: false,
            stderr: String::new(),
            stderr_truncated: false,
            error: None,
        }),
        Action::ReadFile(_) => ActionResult::ReadFile(ReadFileResult {
            ok: true,
            content_base64: None,
            truncated: false,
            error: None,
        }),
        Action::WriteFile(_) => ActionResult::WriteFile(WriteFileResult {
            ok: true,
            artifacts: vec![],
            error: None,
        }),
        Action::ServiceControl(svc) => ActionResult::ServiceControl(planned(service_control(svc))),
        Action::InstallPackages(pkgs) => {
            ActionResult::InstallPackages(planned(vec![install_packages(pkgs)]))
        }
        Action::RemovePackages(pkgs) => {
            ActionResult::RemovePackages(planned(vec![remove_packages(pkgs)]))
        }
        Action::UpdateSystem(upd) => ActionResult::UpdateSystem(planned(update_system(upd))),
        Action::Observe(obs) => ActionResult::Observe(planned(vec![observe(obs)])),
        Action::CgroupApply(cg) => ActionResult::CgroupApply(planned(cgroup_apply(cg))),
        Action::FirmwareOp(fw) => ActionResult::FirmwareOp(planned(vec![firmware_op(fw)])),
        Action::Ping(_) => ActionResult::Pong(PongResult {
            ok: true,
            error: None,
        }),
    }
}

fn planned(commands: Vec<Vec<String>>) -> PlannedResult {
    PlannedResult {
        ok: true,
        commands,
        executed: false,
        error: None,
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn service_control(svc: &ServiceControlAction) -> Vec<Vec<String>> {
    vec![argv(&["systemctl", svc.action.as_str(), &svc.unit])]
}

fn install_packages(pkgs: &PackagesAction) -> Vec<String> {
    let mut cmd = match pkgs.manager {
        PackageManager::Apt => argv(&["apt-get", "install", "-y"]),
        PackageManager::Dnf => argv(&["dnf", "install", "-y"]),
        PackageManager::Pacman => argv(&["pacman", "-S", "--noconfirm"]),
        PackageManager::Zypper => argv(&["zypper", "install", "-y"]),
        PackageManager::Brew => argv(&["brew", "install"]),
    };
    cmd.extend(pkgs.packages.iter().cloned());
    cmd
}

fn remove_packages(pkgs: &PackagesAction) -> Vec<String> {
    let mut cmd = match pkgs.manager {
        PackageManager::Apt => argv(&["apt-get", "remove", "-y"]),
        PackageManager::Dnf => argv(&["dnf", "remove", "-y"]),
        PackageManager::Pacman => argv(&["pacman", "-R", "--noconfirm"]),
        PackageManager::Zypper => argv(&["zypper", "remove", "-y"]),
        PackageManager::Brew => argv(&["brew", "uninstall"]),
    };
    cmd.extend(pkgs.packages.iter().cloned());
    cmd
}

fn update_system(upd: &UpdateSystemAction) -> Vec<Vec<String>> {
    match upd.manager {
        PackageManager::Apt => vec![
            argv(&["apt-get", "update"]),
            argv(&["apt-get", "upgrade", "-y"]),
        ],
        PackageManager::Dnf => vec![argv(&["dnf", "upgrade", "-y"])],
        PackageManager::Pacman => vec![argv(&["pacman", "-Syu", "--noconfirm"])],
        PackageManager::Zypper => vec![argv(&["zypper", "update", "-y"])],
        PackageManager::Brew => vec![argv(&["brew", "update"]), argv(&["brew", "upgrade"])],
    }
}

fn observe(obs: &ObserveAction) -> Vec<String> {
    let mut cmd = vec![obs.tool.program().to_string()];
    cmd.extend(obs.args.iter().cloned());
    cmd
}

/// A unit is adjusted through systemd; a bare pid gets its own cgroup.
fn cgroup_apply(cg: &CgroupApplyAction) -> Vec<Vec<String>> {
    let mut properties = Vec::new();
    if let Some(w) = cg.cpu_weight {
        properties.push(("CPUWeight", "cpu.weight", w.to_string()));
    }
    if let Some(m) = cg.mem_max_bytes {
        properties.push(("MemoryMax", "memory.max", m.to_string()));
    }

    if let Some(unit) = &cg.unit {
        let mut cmd = argv(&["systemctl", "set-property", "--runtime", unit]);
        cmd.extend(properties.iter().map(|(key, _, v)| format!("{key}={v}")));
        return vec![cmd];
    }

    let pid = cg.pid.unwrap_or_default();
    let group = format!("planguard/pid-{pid}");
    let controllers = format!("cpu,memory:{group}");
    let mut commands = vec![argv(&["cgcreate", "-g", &controllers])];
    for (_, file, v) in &properties {
        commands.push(argv(&["cgset", "-r", &format!("{file}={v}"), &group]));
    }
    commands.push(argv(&["cgclassify", "-g", &controllers, &pid.to_string()]));
    commands
}

fn firmware_op(fw: &FirmwareOpAction) -> Vec<String> {
    match fw.op {
        FirmwareOp::Inventory => argv(&["dmidecode"]),
        FirmwareOp::FwupdUpdate => argv(&["fwupdmgr", "update"]),
        FirmwareOp::UefiVarRead => {
            let name = fw.uefi_var_name.as_deref().unwrap_or_default();
            vec!["cat".to_string(), format!("{EFIVARS_DIR}/{name}")]
        }
    }
}
