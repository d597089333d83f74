// ABOUTME: defines the shared action protocol types used by planguard and planguardd.
// ABOUTME: provides strict parsing, validation and redaction helpers to keep execution deterministic.

mod plan;
mod redact;
mod result;
pub mod validate;

pub use plan::{
    Action, ActionPlan, CgroupApplyAction, Confirmation, ExecAction, FirmwareOp, FirmwareOpAction,
    Mode, ObserveAction, ObserveTool, PackageManager, PackagesAction, PingAction, ReadFileAction,
    ServiceControlAction, ServiceControlVerb, UpdateSystemAction, WriteFileAction,
};
pub use redact::REDACTED;
pub use result::{
    ActionError, ActionErrorCode, ActionPlanResult, ActionResult, ErrorCode, ExecResult,
    PlannedResult, PongResult, ReadFileResult, RequestError, WriteFileResult,
};
pub use validate::{validate, ValidatedPlan, ValidationError};

/// Placeholder request id for responses to bodies whose id could not be recovered.
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        let position = format!("at line {} column {}", err.line(), err.column());
        let message = match err.classify() {
            Category::Data if names_only_keys(&err) => err.to_string(),
            Category::Data => format!("value does not match the action plan schema {position}"),
            Category::Syntax => format!("malformed json {position}"),
            Category::Eof => "unexpected end of input".to_string(),
            Category::Io => "failed to read input".to_string(),
        };
        ParseError { message }
    }
}

/// serde messages of these kinds quote key or tag names only, never field values.
fn names_only_keys(err: &serde_json::Error) -> bool {
    let text = err.to_string();
    ["unknown field", "unknown variant", "missing field", "duplicate field"]
        .iter()
        .any(|prefix| text.starts_with(prefix))
}

/// Parses exactly one action plan document. Unknown fields, unknown action tags,
/// type mismatches and trailing data are all errors.
pub fn parse(input: &[u8]) -> Result<ActionPlan, ParseError> {
    Ok(serde_json::from_slice(input)?)
}

pub fn parse_action_plan(input: &str) -> Result<ActionPlan, ParseError> {
    parse(input.as_bytes())
}

pub fn serialize(result: &ActionPlanResult) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(result)
}

/// Returns `request_id` if it is fit to be echoed back: non-blank and within the cap.
pub fn echo_request_id(request_id: &str) -> String {
    if request_id.trim().is_empty() || request_id.len() > validate::MAX_REQUEST_ID_BYTES {
        return UNKNOWN_REQUEST_ID.to_string();
    }
    request_id.to_string()
}

/// Best-effort recovery of `request_id` from a body that failed strict parsing,
/// so the rejection can still be correlated by the caller.
pub fn salvage_request_id(input: &[u8]) -> String {
    let value: serde_json::Value = match serde_json::from_slice(input) {
        Ok(v) => v,
        Err(_) => return UNKNOWN_REQUEST_ID.to_string(),
    };
    match value.get("request_id").and_then(|v| v.as_str()) {
        Some(id) => echo_request_id(id),
        None => UNKNOWN_REQUEST_ID.to_string(),
    }
}
