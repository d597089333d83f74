// ABOUTME: checks parsed action plans against size caps and categorical rules before any policy runs.
// ABOUTME: validation is pure and fail-fast; messages never quote values taken from the request.

use crate::plan::{Action, ActionPlan, FirmwareOp, Mode};
use crate::result::ErrorCode;

pub const MAX_ACTIONS: usize = 64;
pub const MAX_REQUEST_ID_BYTES: usize = 128;
pub const MAX_SESSION_ID_BYTES: usize = 128;
pub const MAX_VERSION_BYTES: usize = 32;
pub const MAX_MODE_BYTES: usize = 16;
pub const MAX_TOKEN_BYTES: usize = 256;
pub const MAX_REASON_BYTES: usize = 2048;
pub const MAX_ADVISORY_BYTES: usize = 2048;
pub const MAX_PATH_BYTES: usize = 4096;
pub const MAX_EXEC_ARGC: usize = 64;
pub const MAX_EXEC_ARG_BYTES: usize = 2048;
pub const MAX_EXEC_ENV_ENTRIES: usize = 32;
pub const MAX_EXEC_ENV_KEY_BYTES: usize = 128;
pub const MAX_EXEC_ENV_VALUE_BYTES: usize = 2048;
pub const MAX_EXEC_TIMEOUT_SEC: u64 = 60;
pub const MAX_READ_FILE_BYTES: u64 = 64 * 1024;
pub const MAX_WRITE_FILE_BYTES: usize = 64 * 1024;
pub const MAX_FILE_MODE_BYTES: usize = 16;
pub const MAX_NAME_BYTES: usize = 256;
pub const MAX_PACKAGES: usize = 64;
pub const MAX_OBSERVE_ARGS: usize = 32;
pub const MAX_CPU_WEIGHT: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
}

impl ValidationError {
    fn invalid(message: &str) -> Self {
        Self {
            code: ErrorCode::ValidationFailed,
            message: message.to_string(),
        }
    }
}

/// A plan that passed [`validate`]. Only constructible through validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPlan {
    plan: ActionPlan,
    mode: Mode,
}

impl ValidatedPlan {
    pub fn plan(&self) -> &ActionPlan {
        &self.plan
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn actions(&self) -> &[Action] {
        &self.plan.actions
    }

    pub fn confirmation_token(&self) -> Option<&str> {
        self.plan.confirmation.as_ref().map(|c| c.token.as_str())
    }

    pub fn into_inner(self) -> ActionPlan {
        self.plan
    }
}

pub fn validate(plan: ActionPlan) -> Result<ValidatedPlan, ValidationError> {
    let mode = check(&plan)?;
    Ok(ValidatedPlan { plan, mode })
}

/// Runs every check without taking ownership of the plan.
pub fn check(plan: &ActionPlan) -> Result<Mode, ValidationError> {
    if plan.request_id.trim().is_empty() {
        return Err(ValidationError::invalid("request_id must be non-empty"));
    }
    if plan.request_id.len() > MAX_REQUEST_ID_BYTES {
        return Err(ValidationError::invalid("request_id is too long"));
    }

    if plan.actions.len() > MAX_ACTIONS {
        return Err(ValidationError::invalid("too many actions"));
    }

    check_envelope(plan)?;
    for action in &plan.actions {
        check_action(action)?;
    }

    for action in &plan.actions {
        if let Action::Exec(exec) = action {
            if exec.as_root {
                return Err(ValidationError::invalid("exec.as_root is not supported"));
            }
        }
    }

    plan_mode(plan)
}

fn plan_mode(plan: &ActionPlan) -> Result<Mode, ValidationError> {
    Mode::from_wire(&plan.mode).ok_or_else(|| ValidationError {
        code: ErrorCode::InvalidMode,
        message: "mode must be plan_only or execute".to_string(),
    })
}

fn check_envelope(plan: &ActionPlan) -> Result<(), ValidationError> {
    if let Some(session_id) = &plan.session_id {
        if session_id.trim().is_empty() {
            return Err(ValidationError::invalid("session_id must be non-empty when provided"));
        }
        if session_id.len() > MAX_SESSION_ID_BYTES {
            return Err(ValidationError::invalid("session_id is too long"));
        }
    }

    if plan.version.trim().is_empty() {
        return Err(ValidationError::invalid("version must be non-empty"));
    }
    if plan.version.len() > MAX_VERSION_BYTES {
        return Err(ValidationError::invalid("version is too long"));
    }
    if plan.mode.len() > MAX_MODE_BYTES {
        return Err(ValidationError::invalid("mode is too long"));
    }

    if let Some(confirmation) = &plan.confirmation {
        if confirmation.token.len() > MAX_TOKEN_BYTES {
            return Err(ValidationError::invalid("confirmation.token is too long"));
        }
    }

    Ok(())
}

fn check_action(action: &Action) -> Result<(), ValidationError> {
    let kind = action.kind();
    match action {
        Action::Exec(exec) => {
            if exec.argv.is_empty() {
                return Err(ValidationError::invalid("exec.argv must be non-empty"));
            }
            if exec.argv[0].trim().is_empty() {
                return Err(ValidationError::invalid("exec.argv[0] must be non-empty"));
            }
            if exec.argv.len() > MAX_EXEC_ARGC {
                return Err(ValidationError::invalid("exec.argv has too many args"));
            }
            if exec.argv.iter().any(|a| a.len() > MAX_EXEC_ARG_BYTES) {
                return Err(ValidationError::invalid("exec.argv arg is too long"));
            }
            if exec.argv.iter().any(|a| a.contains('\0')) {
                return Err(ValidationError::invalid("exec.argv arg contains a nul byte"));
            }
            if let Some(cwd) = &exec.cwd {
                check_path("exec.cwd", cwd)?;
            }
            if let Some(env) = &exec.env {
                if env.len() > MAX_EXEC_ENV_ENTRIES {
                    return Err(ValidationError::invalid("exec.env has too many entries"));
                }
                for (k, v) in env {
                    if k.is_empty() || k.contains('=') || k.contains('\0') {
                        return Err(ValidationError::invalid("exec.env key is malformed"));
                    }
                    if k.len() > MAX_EXEC_ENV_KEY_BYTES {
                        return Err(ValidationError::invalid("exec.env key is too long"));
                    }
                    if v.len() > MAX_EXEC_ENV_VALUE_BYTES {
                        return Err(ValidationError::invalid("exec.env value is too long"));
                    }
                    if v.contains('\0') {
                        return Err(ValidationError::invalid("exec.env value contains a nul byte"));
                    }
                }
            }
            if exec.timeout_sec == 0 {
                return Err(ValidationError::invalid("exec.timeout_sec must be >= 1"));
            }
            if exec.timeout_sec > MAX_EXEC_TIMEOUT_SEC {
                return Err(ValidationError::invalid("exec.timeout_sec is too large"));
            }
            check_rationale(kind, &exec.reason, &exec.danger, &exec.recovery)
        }
        Action::ReadFile(read) => {
            check_path("read_file.path", &read.path)?;
            if read.max_bytes == 0 {
                return Err(ValidationError::invalid("read_file.max_bytes must be >= 1"));
            }
            if read.max_bytes > MAX_READ_FILE_BYTES {
                return Err(ValidationError::invalid("read_file.max_bytes is too large"));
            }
            check_rationale(kind, &read.reason, &read.danger, &read.recovery)
        }
        Action::WriteFile(write) => {
            check_path("write_file.path", &write.path)?;
            if write.content.len() > MAX_WRITE_FILE_BYTES {
                return Err(ValidationError::invalid("write_file.content is too large"));
            }
            if write.mode.trim().is_empty() {
                return Err(ValidationError::invalid("write_file.mode must be non-empty"));
            }
            if write.mode.len() > MAX_FILE_MODE_BYTES {
                return Err(ValidationError::invalid("write_file.mode is too long"));
            }
            check_rationale(kind, &write.reason, &write.danger, &write.recovery)
        }
        Action::ServiceControl(svc) => {
            check_name("service_control.unit", &svc.unit)?;
            check_rationale(kind, &svc.reason, &svc.danger, &svc.recovery)
        }
        Action::InstallPackages(pkgs) | Action::RemovePackages(pkgs) => {
            if pkgs.packages.is_empty() {
                return Err(ValidationError::invalid("packages must be non-empty"));
            }
            if pkgs.packages.len() > MAX_PACKAGES {
                return Err(ValidationError::invalid("packages has too many entries"));
            }
            for name in &pkgs.packages {
                check_name("packages entry", name)?;
            }
            check_rationale(kind, &pkgs.reason, &pkgs.danger, &pkgs.recovery)
        }
        Action::UpdateSystem(upd) => check_rationale(kind, &upd.reason, &upd.danger, &upd.recovery),
        Action::Observe(obs) => {
            if obs.args.len() > MAX_OBSERVE_ARGS {
                return Err(ValidationError::invalid("observe.args has too many entries"));
            }
            if obs.args.iter().any(|a| a.len() > MAX_EXEC_ARG_BYTES) {
                return Err(ValidationError::invalid("observe.args arg is too long"));
            }
            check_rationale(kind, &obs.reason, &obs.danger, &obs.recovery)
        }
        Action::CgroupApply(cg) => {
            match (&cg.pid, &cg.unit) {
                (Some(_), None) => {}
                (None, Some(unit)) => check_name("cgroup_apply.unit", unit)?,
                _ => {
                    return Err(ValidationError::invalid(
                        "cgroup_apply requires exactly one of pid or unit",
                    ))
                }
            }
            if cg.cpu_weight.is_none() && cg.mem_max_bytes.is_none() {
                return Err(ValidationError::invalid(
                    "cgroup_apply requires cpu_weight or mem_max_bytes",
                ));
            }
            if let Some(weight) = cg.cpu_weight {
                if weight == 0 || weight > MAX_CPU_WEIGHT {
                    return Err(ValidationError::invalid("cgroup_apply.cpu_weight is out of range"));
                }
            }
            if cg.mem_max_bytes == Some(0) {
                return Err(ValidationError::invalid("cgroup_apply.mem_max_bytes must be >= 1"));
            }
            check_rationale(kind, &cg.reason, &cg.danger, &cg.recovery)
        }
        Action::FirmwareOp(fw) => {
            match (fw.op, &fw.uefi_var_name) {
                (FirmwareOp::UefiVarRead, Some(name)) => {
                    check_name("firmware_op.uefi_var_name", name)?;
                    if name.contains('/') || name == "." || name == ".." {
                        return Err(ValidationError::invalid(
                            "firmware_op.uefi_var_name must be a plain name",
                        ));
                    }
                }
                (FirmwareOp::UefiVarRead, None) => {
                    return Err(ValidationError::invalid(
                        "firmware_op.uefi_var_name is required for uefi_var_read",
                    ))
                }
                (_, Some(_)) => {
                    return Err(ValidationError::invalid(
                        "firmware_op.uefi_var_name is only valid for uefi_var_read",
                    ))
                }
                (_, None) => {}
            }
            check_rationale(kind, &fw.reason, &fw.danger, &fw.recovery)
        }
        Action::Ping(ping) => match &ping.reason {
            Some(reason) if reason.len() > MAX_REASON_BYTES => {
                Err(ValidationError::invalid("reason is too long"))
            }
            _ => Ok(()),
        },
    }
}

fn check_path(field: &str, path: &str) -> Result<(), ValidationError> {
    if path.trim().is_empty() {
        return Err(ValidationError::invalid(&format!("{field} must be non-empty")));
    }
    if path.len() > MAX_PATH_BYTES {
        return Err(ValidationError::invalid("path is too long"));
    }
    if path.contains('\0') {
        return Err(ValidationError::invalid("path contains a nul byte"));
    }
    Ok(())
}

/// Names that end up as command arguments must not be readable as options.
fn check_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::invalid(&format!("{field} must be non-empty")));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(ValidationError::invalid(&format!("{field} is too long")));
    }
    if name.starts_with('-') {
        return Err(ValidationError::invalid(&format!("{field} must not start with '-'")));
    }
    if name.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ValidationError::invalid(&format!(
            "{field} must not contain whitespace or control characters"
        )));
    }
    Ok(())
}

fn check_rationale(
    kind: &str,
    reason: &str,
    danger: &Option<String>,
    recovery: &Option<String>,
) -> Result<(), ValidationError> {
    if reason.trim().is_empty() {
        return Err(ValidationError::invalid(&format!("{kind}.reason must be non-empty")));
    }
    if reason.len() > MAX_REASON_BYTES {
        return Err(ValidationError::invalid("reason is too long"));
    }
    if danger.as_ref().is_some_and(|d| d.len() > MAX_ADVISORY_BYTES) {
        return Err(ValidationError::invalid("danger is too long"));
    }
    if recovery.as_ref().is_some_and(|r| r.len() > MAX_ADVISORY_BYTES) {
        return Err(ValidationError::invalid("recovery is too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{
        CgroupApplyAction, Confirmation, ExecAction, FirmwareOpAction, PackageManager,
        PackagesAction, PingAction, ReadFileAction, WriteFileAction,
    };

    fn plan_with(actions: Vec<Action>) -> ActionPlan {
        ActionPlan {
            request_id: "req-1".to_string(),
            session_id: None,
            version: "0.1".to_string(),
            mode: "execute".to_string(),
            confirmation: None,
            actions,
        }
    }

    fn echo() -> ExecAction {
        ExecAction {
            argv: vec!["/bin/echo".to_string(), "hi".to_string()],
            cwd: None,
            env: None,
            timeout_sec: 5,
            as_root: false,
            reason: "test".to_string(),
            danger: None,
            recovery: None,
        }
    }

    fn message(plan: ActionPlan) -> String {
        validate(plan).unwrap_err().message
    }

    #[test]
    fn accepts_minimal_execute_plan() {
        let validated = validate(plan_with(vec![Action::Exec(echo())])).unwrap();
        assert_eq!(validated.mode(), Mode::Execute);
        assert_eq!(validated.actions().len(), 1);
        assert_eq!(validated.confirmation_token(), None);
    }

    #[test]
    fn rejects_blank_request_id() {
        let mut plan = plan_with(vec![]);
        plan.request_id = "   ".to_string();
        assert_eq!(message(plan), "request_id must be non-empty");
    }

    #[test]
    fn rejects_request_id_too_long() {
        let mut plan = plan_with(vec![]);
        plan.request_id = "a".repeat(MAX_REQUEST_ID_BYTES + 1);
        assert_eq!(message(plan), "request_id is too long");
    }

    #[test]
    fn rejects_too_many_actions() {
        let actions = (0..MAX_ACTIONS + 1).map(|_| Action::Ping(PingAction::default())).collect();
        assert_eq!(message(plan_with(actions)), "too many actions");
    }

    #[test]
    fn rejects_empty_exec_argv() {
        let mut exec = echo();
        exec.argv.clear();
        assert_eq!(message(plan_with(vec![Action::Exec(exec)])), "exec.argv must be non-empty");
    }

    #[test]
    fn rejects_exec_too_many_args() {
        let mut exec = echo();
        exec.argv.extend((0..MAX_EXEC_ARGC).map(|_| "x".to_string()));
        assert_eq!(message(plan_with(vec![Action::Exec(exec)])), "exec.argv has too many args");
    }

    #[test]
    fn rejects_exec_arg_too_long() {
        let mut exec = echo();
        exec.argv.push("a".repeat(MAX_EXEC_ARG_BYTES + 1));
        assert_eq!(message(plan_with(vec![Action::Exec(exec)])), "exec.argv arg is too long");
    }

    #[test]
    fn rejects_exec_env_too_many_entries() {
        let mut exec = echo();
        exec.env = Some((0..33).map(|i| (format!("K{i}"), "V".to_string())).collect());
        assert_eq!(
            message(plan_with(vec![Action::Exec(exec)])),
            "exec.env has too many entries"
        );
    }

    #[test]
    fn rejects_exec_env_value_too_long_without_echoing_it() {
        let secret = "s".repeat(MAX_EXEC_ENV_VALUE_BYTES + 1);
        let mut exec = echo();
        exec.env = Some([("TOKEN".to_string(), secret.clone())].into_iter().collect());
        let msg = message(plan_with(vec![Action::Exec(exec)]));
        assert_eq!(msg, "exec.env value is too long");
        assert!(!msg.contains(&secret));
    }

    #[test]
    fn rejects_exec_timeout_above_ceiling() {
        let mut exec = echo();
        exec.timeout_sec = MAX_EXEC_TIMEOUT_SEC + 1;
        assert_eq!(message(plan_with(vec![Action::Exec(exec)])), "exec.timeout_sec is too large");
    }

    #[test]
    fn rejects_as_root_true() {
        let mut exec = echo();
        exec.as_root = true;
        let err = validate(plan_with(vec![Action::Exec(exec)])).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.message, "exec.as_root is not supported");
    }

    #[test]
    fn bounds_are_checked_before_as_root() {
        let mut root = echo();
        root.as_root = true;
        let mut long = echo();
        long.reason = "r".repeat(MAX_REASON_BYTES + 1);
        let err = validate(plan_with(vec![Action::Exec(root), Action::Exec(long)])).unwrap_err();
        assert_eq!(err.message, "reason is too long");
    }

    #[test]
    fn rejects_read_file_max_bytes_too_large() {
        let read = ReadFileAction {
            path: "./Cargo.toml".to_string(),
            max_bytes: 10 * 1024 * 1024,
            reason: "test".to_string(),
            danger: None,
            recovery: None,
        };
        assert_eq!(
            message(plan_with(vec![Action::ReadFile(read)])),
            "read_file.max_bytes is too large"
        );
    }

    #[test]
    fn rejects_write_file_content_too_large() {
        let write = WriteFileAction {
            path: "./out.txt".to_string(),
            content: "a".repeat(128 * 1024),
            mode: "0644".to_string(),
            reason: "test".to_string(),
            danger: None,
            recovery: None,
        };
        assert_eq!(
            message(plan_with(vec![Action::WriteFile(write)])),
            "write_file.content is too large"
        );
    }

    #[test]
    fn rejects_missing_reason() {
        let mut exec = echo();
        exec.reason = " ".to_string();
        assert_eq!(message(plan_with(vec![Action::Exec(exec)])), "exec.reason must be non-empty");
    }

    #[test]
    fn rejects_package_name_that_looks_like_an_option() {
        let pkgs = PackagesAction {
            manager: PackageManager::Apt,
            packages: vec!["curl".to_string(), "--allow-downgrades".to_string()],
            reason: "test".to_string(),
            danger: None,
            recovery: None,
        };
        assert_eq!(
            message(plan_with(vec![Action::InstallPackages(pkgs)])),
            "packages entry must not start with '-'"
        );
    }

    #[test]
    fn rejects_cgroup_apply_with_both_targets() {
        let cg = CgroupApplyAction {
            pid: Some(42),
            unit: Some("foo.service".to_string()),
            cpu_weight: None,
            mem_max_bytes: None,
            reason: "test".to_string(),
            danger: None,
            recovery: None,
        };
        assert_eq!(
            message(plan_with(vec![Action::CgroupApply(cg)])),
            "cgroup_apply requires exactly one of pid or unit"
        );
    }

    #[test]
    fn rejects_cgroup_apply_without_limits() {
        let cg = CgroupApplyAction {
            pid: None,
            unit: Some("foo.service".to_string()),
            cpu_weight: None,
            mem_max_bytes: None,
            reason: "test".to_string(),
            danger: None,
            recovery: None,
        };
        assert_eq!(
            message(plan_with(vec![Action::CgroupApply(cg)])),
            "cgroup_apply requires cpu_weight or mem_max_bytes"
        );
    }

    #[test]
    fn rejects_uefi_var_name_with_separator() {
        let fw = FirmwareOpAction {
            op: FirmwareOp::UefiVarRead,
            uefi_var_name: Some("../../etc/shadow".to_string()),
            reason: "test".to_string(),
            danger: None,
            recovery: None,
        };
        assert_eq!(
            message(plan_with(vec![Action::FirmwareOp(fw)])),
            "firmware_op.uefi_var_name must be a plain name"
        );
    }

    #[test]
    fn rejects_oversized_confirmation_token() {
        let mut plan = plan_with(vec![]);
        plan.confirmation = Some(Confirmation {
            token: "t".repeat(MAX_TOKEN_BYTES + 1),
        });
        assert_eq!(message(plan), "confirmation.token is too long");
    }

    #[test]
    fn unknown_mode_is_reported_as_invalid_mode() {
        let mut plan = plan_with(vec![Action::Exec(echo())]);
        plan.mode = "yolo".to_string();
        let err = validate(plan).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidMode);
    }

    #[test]
    fn oversized_mode_is_a_validation_failure() {
        let mut plan = plan_with(vec![]);
        plan.mode = "x".repeat(MAX_MODE_BYTES + 1);
        let err = validate(plan).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.message, "mode is too long");
    }

    #[test]
    fn mode_is_checked_last() {
        let mut plan = plan_with(vec![]);
        plan.mode = "yolo".to_string();
        plan.version = String::new();
        let err = validate(plan).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.message, "version must be non-empty");
    }
}
