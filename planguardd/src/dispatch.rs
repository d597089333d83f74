// ABOUTME: walks a validated plan in order, authorizing each action and routing it to an executor.
// ABOUTME: rejected actions never reach an executor; every action gets exactly one result.

use planguard_protocol::{Action, ActionResult, Mode, ValidatedPlan};
use tracing::debug;

use crate::actions;
use crate::config::DaemonConfig;
use crate::policy::{self, PolicyConfig};

#[derive(Debug)]
pub struct Dispatched {
    pub results: Vec<ActionResult>,
    /// True when at least one live executor ran in execute mode.
    pub executed: bool,
}

pub async fn dispatch(plan: &ValidatedPlan, config: &DaemonConfig) -> Dispatched {
    let mode = plan.mode();
    let token = plan.confirmation_token();
    let expected = config.confirm_token.as_deref();

    let mut results = Vec::with_capacity(plan.actions().len());
    let mut executed = false;
    for (index, action) in plan.actions().iter().enumerate() {
        let decision = policy::decide(action, mode, &config.policy);
        let result = match policy::resolve(decision, token, expected) {
            Err(error) => {
                debug!(index, kind = action.kind(), ?decision, code = ?error.code, "action rejected");
                ActionResult::rejected(action, error)
            }
            Ok(()) if mode == Mode::PlanOnly || !is_live(action) => {
                debug!(index, kind = action.kind(), ?decision, "action described");
                actions::planned::describe(action)
            }
            Ok(()) => {
                debug!(index, kind = action.kind(), danger = action.danger(), "action running");
                executed = true;
                run_live(action, &config.policy).await
            }
        };
        results.push(result);
    }

    Dispatched { results, executed }
}

/// Capabilities that have a real executor in this daemon.
fn is_live(action: &Action) -> bool {
    matches!(
        action,
        Action::Exec(_) | Action::ReadFile(_) | Action::WriteFile(_) | Action::Ping(_)
    )
}

async fn run_live(action: &Action, policy: &PolicyConfig) -> ActionResult {
    match action {
        Action::Exec(exec) => {
            let cwd = exec.cwd.as_deref().map(|c| policy.resolve_path(c));
            actions::exec::run(exec, cwd.as_deref()).await
        }
        Action::ReadFile(read) => actions::files::read(read, &policy.resolve_path(&read.path)).await,
        Action::WriteFile(write) => {
            actions::files::write(write, &policy.resolve_path(&write.path)).await
        }
        other => actions::planned::describe(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use planguard_protocol::{parse_action_plan, validate, ActionErrorCode};

    fn config(safe_root: PathBuf, token: Option<&str>) -> DaemonConfig {
        DaemonConfig {
            socket_path: safe_root.join("d.sock"),
            audit_path: safe_root.join("audit.jsonl"),
            confirm_token: token.map(str::to_string),
            max_request_bytes: 1024,
            read_idle_timeout: Duration::from_millis(50),
            read_deadline: Duration::from_secs(1),
            policy: PolicyConfig {
                safe_root,
                ..PolicyConfig::default()
            },
        }
    }

    fn plan(json: &str) -> ValidatedPlan {
        validate(parse_action_plan(json).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn results_keep_submission_order_when_an_action_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "A").unwrap();
        let plan = plan(
            r#"{"request_id":"req-1","version":"0.1","mode":"execute","actions":[
                {"type":"read_file","path":"a.txt","max_bytes":10,"reason":"r"},
                {"type":"exec","argv":["/bin/false"],"timeout_sec":5,"reason":"r"},
                {"type":"write_file","path":"c.txt","content":"C","mode":"0644","reason":"r"}
            ]}"#,
        );

        let out = dispatch(&plan, &config(dir.path().to_path_buf(), None)).await;
        assert_eq!(out.results.len(), 3);
        assert!(matches!(&out.results[0], ActionResult::ReadFile(r) if r.ok));
        match &out.results[1] {
            ActionResult::Exec(r) => {
                assert_eq!(r.error.as_ref().unwrap().code, ActionErrorCode::ConfirmationRequired)
            }
            _ => panic!("unexpected action result type"),
        }
        assert!(matches!(&out.results[2], ActionResult::WriteFile(r) if r.ok));
        assert_eq!(std::fs::read_to_string(dir.path().join("c.txt")).unwrap(), "C");
        assert!(out.executed);
    }

    #[tokio::test]
    async fn plan_only_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            r#"{"request_id":"req-1","version":"0.1","mode":"plan_only","actions":[
                {"type":"write_file","path":"out.txt","content":"x","mode":"0644","reason":"r"},
                {"type":"exec","argv":["/usr/bin/touch","touched"],"cwd":".","timeout_sec":5,"reason":"r"}
            ]}"#,
        );

        let out = dispatch(&plan, &config(dir.path().to_path_buf(), None)).await;
        assert!(!out.executed);
        assert!(out.results.iter().all(ActionResult::ok));
        assert!(!dir.path().join("out.txt").exists());
        assert!(!dir.path().join("touched").exists());
    }

    #[tokio::test]
    async fn plan_only_still_reports_denied() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            r#"{"request_id":"req-1","version":"0.1","mode":"plan_only","actions":[
                {"type":"exec","argv":["/bin/dd","if=/dev/zero"],"timeout_sec":5,"reason":"r"}
            ]}"#,
        );

        let out = dispatch(&plan, &config(dir.path().to_path_buf(), None)).await;
        assert_eq!(out.results[0].error().unwrap().code, ActionErrorCode::PolicyDenied);
    }

    #[tokio::test]
    async fn deferred_kinds_in_execute_mode_are_not_executed() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            r#"{"request_id":"req-1","version":"0.1","mode":"execute","actions":[
                {"type":"install_packages","manager":"apt","packages":["curl"],"reason":"r"}
            ]}"#,
        );

        let out = dispatch(&plan, &config(dir.path().to_path_buf(), None)).await;
        assert!(!out.executed);
        match &out.results[0] {
            ActionResult::InstallPackages(r) => {
                assert!(r.ok);
                assert!(!r.executed);
            }
            _ => panic!("unexpected action result type"),
        }
    }

    #[tokio::test]
    async fn matching_token_unlocks_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            r#"{"request_id":"req-1","version":"0.1","mode":"execute",
                "confirmation":{"token":"let-me"},
                "actions":[{"type":"exec","argv":["/bin/sh","-c","exit 0"],"timeout_sec":5,"reason":"r"}]}"#,
        );

        let out = dispatch(&plan, &config(dir.path().to_path_buf(), Some("let-me"))).await;
        assert!(out.results[0].ok());

        let out = dispatch(&plan, &config(dir.path().to_path_buf(), Some("other"))).await;
        assert_eq!(
            out.results[0].error().unwrap().code,
            ActionErrorCode::ConfirmationRequired
        );
    }

    #[tokio::test]
    async fn unconfirmed_exec_spawns_no_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let plan = plan(&format!(
            r#"{{"request_id":"req-1","version":"0.1","mode":"execute",
                "actions":[{{"type":"exec","argv":["/usr/bin/touch","{}"],"timeout_sec":5,"reason":"r"}}]}}"#,
            marker.display()
        ));

        let out = dispatch(&plan, &config(dir.path().to_path_buf(), Some("t"))).await;
        assert_eq!(
            out.results[0].error().unwrap().code,
            ActionErrorCode::ConfirmationRequired
        );
        assert!(!out.executed);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn relative_exec_cwd_lands_under_safe_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("work")).unwrap();
        let plan = plan(
            r#"{"request_id":"req-1","version":"0.1","mode":"execute",
                "confirmation":{"token":"t"},
                "actions":[{"type":"exec","argv":["/bin/pwd"],"cwd":"work","timeout_sec":5,"reason":"r"}]}"#,
        );

        let out = dispatch(&plan, &config(dir.path().to_path_buf(), Some("t"))).await;
        match &out.results[0] {
            ActionResult::Exec(r) => {
                assert!(r.ok);
                let reported = std::fs::canonicalize(r.stdout.trim()).unwrap();
                let expected = std::fs::canonicalize(dir.path().join("work")).unwrap();
                assert_eq!(reported, expected);
            }
            _ => panic!("unexpected action result type"),
        }
    }
}
