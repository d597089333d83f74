// ABOUTME: defines the response envelope, per-action result variants, and the closed error codes.
// ABOUTME: an action result carries an error exactly when it is not ok.

use serde::{Deserialize, Serialize};

use crate::plan::Action;

/// Request-level failures. Any of these short-circuits dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ParseFailed,
    ValidationFailed,
    InvalidMode,
    RequestTooLarge,
    AuditFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ParseFailed => "parse_failed",
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::InvalidMode => "invalid_mode",
            ErrorCode::RequestTooLarge => "request_too_large",
            ErrorCode::AuditFailed => "audit_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorCode {
    PolicyDenied,
    ConfirmationRequired,
    ExecFailed,
    ExecTimedOut,
    ReadFailed,
    WriteFailed,
    InvalidModeString,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RequestError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ActionError {
    pub code: ActionErrorCode,
    pub message: String,
}

impl ActionError {
    pub fn new(code: ActionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ActionPlanResult {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ActionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RequestError>,
}

impl ActionPlanResult {
    pub fn rejected(
        request_id: impl Into<String>,
        session_id: Option<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            session_id,
            executed: false,
            results: None,
            error: Some(RequestError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn results(&self) -> &[ActionResult] {
        self.results.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionResult {
    Exec(ExecResult),
    ReadFile(ReadFileResult),
    WriteFile(WriteFileResult),
    ServiceControl(PlannedResult),
    InstallPackages(PlannedResult),
    RemovePackages(PlannedResult),
    UpdateSystem(PlannedResult),
    Observe(PlannedResult),
    CgroupApply(PlannedResult),
    FirmwareOp(PlannedResult),
    Pong(PongResult),
}

impl ActionResult {
    /// Builds the failed result matching `action`'s variant without running anything.
    pub fn rejected(action: &Action, error: ActionError) -> ActionResult {
        let planned = || PlannedResult {
            ok: false,
            commands: vec![],
            executed: false,
            error: Some(error.clone()),
        };
        match action {
            Action::Exec(_) => ActionResult::Exec(ExecResult {
                ok: false,
                exit_code: None,
                stdout: String::new(),
                stdout_truncated: false,
                stderr: String::new(),
                stderr_truncated: false,
                error: Some(error.clone()),
            }),
            Action::ReadFile(_) => ActionResult::ReadFile(ReadFileResult {
                ok: false,
                content_base64: None,
                truncated: false,
                error: Some(error.clone()),
            }),
            Action::WriteFile(_) => ActionResult::WriteFile(WriteFileResult {
                ok: false,
                artifacts: vec![],
                error: Some(error.clone()),
            }),
            Action::ServiceControl(_) => ActionResult::ServiceControl(planned()),
            Action::InstallPackages(_) => ActionResult::InstallPackages(planned()),
            Action::RemovePackages(_) => ActionResult::RemovePackages(planned()),
            Action::UpdateSystem(_) => ActionResult::UpdateSystem(planned()),
            Action::Observe(_) => ActionResult::Observe(planned()),
            Action::CgroupApply(_) => ActionResult::CgroupApply(planned()),
            Action::FirmwareOp(_) => ActionResult::FirmwareOp(planned()),
            Action::Ping(_) => ActionResult::Pong(PongResult {
                ok: false,
                error: Some(error.clone()),
            }),
        }
    }

    pub fn ok(&self) -> bool {
        match self {
            ActionResult::Exec(r) => r.ok,
            ActionResult::ReadFile(r) => r.ok,
            ActionResult::WriteFile(r) => r.ok,
            ActionResult::ServiceControl(r)
            | ActionResult::InstallPackages(r)
            | ActionResult::RemovePackages(r)
            | ActionResult::UpdateSystem(r)
            | ActionResult::Observe(r)
            | ActionResult::CgroupApply(r)
            | ActionResult::FirmwareOp(r) => r.ok,
            ActionResult::Pong(r) => r.ok,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            ActionResult::Exec(r) => r.error.as_ref(),
            ActionResult::ReadFile(r) => r.error.as_ref(),
            ActionResult::WriteFile(r) => r.error.as_ref(),
            ActionResult::ServiceControl(r)
            | ActionResult::InstallPackages(r)
            | ActionResult::RemovePackages(r)
            | ActionResult::UpdateSystem(r)
            | ActionResult::Observe(r)
            | ActionResult::CgroupApply(r)
            | ActionResult::FirmwareOp(r) => r.error.as_ref(),
            ActionResult::Pong(r) => r.error.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PongResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecResult {
    pub ok: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReadFileResult {
    pub ok: bool,
    #[serde(default)]
    pub content_base64: Option<String>,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WriteFileResult {
    pub ok: bool,
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

/// Result of a deferred capability: the command lines it would run, never run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PlannedResult {
    pub ok: bool,
    pub commands: Vec<Vec<String>>,
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}
