// ABOUTME: provides planguard helpers for parsing and validating action plans before sending them.
// ABOUTME: keeps client behavior deterministic by enforcing the same validation the daemon applies.

use std::path::Path;

use anyhow::Context;
use planguard_protocol::{
    parse_action_plan, validate, Action, ActionPlan, ErrorCode, Mode, PingAction, RequestError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

pub const PROTOCOL_VERSION: &str = "0.1";

pub fn apply_overrides(
    mut plan: ActionPlan,
    request_id: Option<&str>,
    session_id: Option<&str>,
) -> anyhow::Result<ActionPlan> {
    if let Some(request_id) = request_id {
        if request_id.trim().is_empty() {
            return Err(anyhow::anyhow!("request_id override must be non-empty"));
        }
        plan.request_id = request_id.to_string();
    }

    if let Some(session_id) = session_id {
        if session_id.trim().is_empty() {
            return Err(anyhow::anyhow!("session_id override must be non-empty"));
        }
        plan.session_id = Some(session_id.to_string());
    }

    Ok(plan)
}

pub fn parse_and_validate(input: &str) -> anyhow::Result<ActionPlan> {
    let plan = parse_action_plan(input)?;
    Ok(validate(plan)?.into_inner())
}

/// Overrides are applied before validation, so a blank id in the file can be
/// replaced from the command line.
pub fn prepare_send(
    input: &str,
    request_id: Option<&str>,
    session_id: Option<&str>,
) -> anyhow::Result<ActionPlan> {
    let plan = parse_action_plan(input)?;
    let plan = apply_overrides(plan, request_id, session_id)?;
    Ok(validate(plan)?.into_inner())
}

pub fn ping_plan(request_id: &str, session_id: Option<&str>, mode: Mode) -> anyhow::Result<ActionPlan> {
    let plan = ActionPlan {
        request_id: request_id.to_string(),
        session_id: None,
        version: PROTOCOL_VERSION.to_string(),
        mode: mode.as_str().to_string(),
        confirmation: None,
        actions: vec![Action::Ping(PingAction::default())],
    };
    let plan = apply_overrides(plan, None, session_id)?;
    Ok(validate(plan)?.into_inner())
}

#[derive(Debug, serde::Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ValidateVerdict {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RequestError>,
}

/// Same error codes the daemon would answer with for this body.
pub fn validate_verdict(input: &str) -> ValidateVerdict {
    match parse_action_plan(input) {
        Ok(plan) => match validate(plan) {
            Ok(_) => ValidateVerdict { ok: true, error: None },
            Err(err) => ValidateVerdict {
                ok: false,
                error: Some(RequestError {
                    code: err.code,
                    message: err.message,
                }),
            },
        },
        Err(err) => ValidateVerdict {
            ok: false,
            error: Some(RequestError {
                code: ErrorCode::ParseFailed,
                message: format!("parse failed: {err}"),
            }),
        },
    }
}

/// Sends one plan and returns the daemon's response body untouched.
pub async fn send(socket_path: &Path, plan: &ActionPlan) -> anyhow::Result<String> {
    let body = serde_json::to_vec(plan)?;
    debug!(request_id = %plan.request_id, bytes = body.len(), "sending plan");

    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connect {}", socket_path.display()))?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_allows_plan_only_mode() {
        let input = r#"{
          "request_id":"req-1",
          "version":"0.1",
          "mode":"plan_only",
          "actions":[]
        }"#;

        parse_and_validate(input).unwrap();
    }

    #[test]
    fn verdict_reports_parse_failed_for_unknown_fields() {
        let input = r#"{
          "request_id":"req-1",
          "version":"0.1",
          "mode":"execute",
          "actions":[],
          "unexpected":"x"
        }"#;

        let v = validate_verdict(input);
        assert!(!v.ok);
        assert_eq!(v.error.as_ref().unwrap().code, ErrorCode::ParseFailed);
    }

    #[test]
    fn verdict_reports_validation_failed_for_missing_request_id() {
        let input = r#"{
          "request_id":"   ",
          "version":"0.1",
          "mode":"execute",
          "actions":[]
        }"#;

        let v = validate_verdict(input);
        assert!(!v.ok);
        assert_eq!(v.error.as_ref().unwrap().code, ErrorCode::ValidationFailed);
    }

    #[test]
    fn verdict_reports_invalid_mode() {
        let input = r#"{"request_id":"req-1","version":"0.1","mode":"fast","actions":[]}"#;

        let v = validate_verdict(input);
        assert_eq!(v.error.as_ref().unwrap().code, ErrorCode::InvalidMode);
    }

    #[test]
    fn verdict_serializes_without_error_when_ok() {
        let input = r#"{"request_id":"req-1","version":"0.1","mode":"execute","actions":[{"type":"ping"}]}"#;

        let text = serde_json::to_string(&validate_verdict(input)).unwrap();
        assert_eq!(text, r#"{"ok":true}"#);
    }

    #[test]
    fn apply_overrides_sets_session_id() {
        let input = r#"{
          "request_id":"req-1",
          "version":"0.1",
          "mode":"execute",
          "actions":[]
        }"#;
        let plan = parse_and_validate(input).unwrap();
        let updated = apply_overrides(plan, None, Some("sess-1")).unwrap();
        assert_eq!(updated.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn prepare_send_allows_blank_request_id_with_override() {
        let input = r#"{
          "request_id":"   ",
          "version":"0.1",
          "mode":"execute",
          "actions":[]
        }"#;

        let plan = prepare_send(input, Some("req-1"), None).unwrap();
        assert_eq!(plan.request_id, "req-1");
    }

    #[test]
    fn prepare_send_refuses_as_root() {
        let input = r#"{"request_id":"req-1","version":"0.1","mode":"execute",
            "actions":[{"type":"exec","argv":["/bin/echo"],"timeout_sec":1,"as_root":true,"reason":"r"}]}"#;

        assert!(prepare_send(input, None, None).is_err());
    }

    #[test]
    fn ping_plan_carries_mode_and_session() {
        let plan = ping_plan("req-ping-1", Some("sess-1"), Mode::PlanOnly).unwrap();
        assert_eq!(plan.mode, "plan_only");
        assert_eq!(plan.session_id.as_deref(), Some("sess-1"));
        assert!(matches!(plan.actions.as_slice(), [Action::Ping(_)]));
    }

    #[tokio::test]
    async fn send_returns_response_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("planguardd.sock");
        let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut body = Vec::new();
            stream.read_to_end(&mut body).await.unwrap();
            let plan: ActionPlan = serde_json::from_slice(&body).unwrap();
            let reply = format!(r#"{{"request_id":"{}","executed":true,"results":[]}}"#, plan.request_id);
            stream.write_all(reply.as_bytes()).await.unwrap();
        });

        let plan = ping_plan("req-send-1", None, Mode::Execute).unwrap();
        let response = send(&socket_path, &plan).await.unwrap();
        assert_eq!(response, r#"{"request_id":"req-send-1","executed":true,"results":[]}"#);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn send_reports_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let plan = ping_plan("req-send-2", None, Mode::Execute).unwrap();

        let err = send(&dir.path().join("missing.sock"), &plan).await.unwrap_err();
        assert!(err.to_string().contains("connect"));
    }
}
