// ABOUTME: writes append-only audit records for each received action plan and its results.
// ABOUTME: one writer task owns the file; handlers wait on a oneshot until their line is durable.

use std::path::Path;

use anyhow::Context;
use planguard_protocol::{ActionPlan, ActionPlanResult, RequestError};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::error;

const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Completed,
    Rejected,
}

/// One line of the audit log. Built only from redacted copies.
#[derive(Debug, Serialize)]
pub struct AuditRecord {
    pub ts_unix_ms: u64,
    pub peer: Option<PeerCredentials>,
    pub request_id: String,
    pub session_id: Option<String>,
    pub mode: Option<String>,
    pub outcome: AuditOutcome,
    pub request_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RequestError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ActionPlan>,
    pub result: ActionPlanResult,
}

impl AuditRecord {
    /// `plan` is absent when the body never parsed.
    pub fn new(
        ts_unix_ms: u64,
        peer: Option<PeerCredentials>,
        request_bytes: usize,
        plan: Option<&ActionPlan>,
        result: &ActionPlanResult,
    ) -> Self {
        let outcome = if result.error.is_some() {
            AuditOutcome::Rejected
        } else {
            AuditOutcome::Completed
        };
        let plan = plan.map(ActionPlan::redacted);
        Self {
            ts_unix_ms,
            peer,
            request_id: result.request_id.clone(),
            session_id: result.session_id.clone(),
            mode: plan.as_ref().map(|p| p.mode.clone()),
            outcome,
            request_bytes,
            error: result.error.clone(),
            plan,
            result: result.redacted(),
        }
    }
}

struct AuditWrite {
    line: Vec<u8>,
    ack: oneshot::Sender<std::io::Result<()>>,
}

impl std::fmt::Debug for AuditWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditWrite")
            .field("len", &self.line.len())
            .finish()
    }
}

/// Handle to the audit writer task. Cheap to clone; one per connection.
#[derive(Debug, Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditWrite>,
}

impl AuditLog {
    /// Opens (or creates) the log for appending and starts the writer task.
    pub async fn open(path: &Path) -> anyhow::Result<(AuditLog, JoinHandle<()>)> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(path)
            .await
            .with_context(|| format!("open audit log at {}", path.display()))?;

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let writer = tokio::spawn(run_writer(file, rx));
        Ok((AuditLog { tx }, writer))
    }

    /// Returns once the record is on disk, or with the reason it is not.
    pub async fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record).context("serialize audit record")?;
        line.push(b'\n');

        let (ack, done) = oneshot::channel();
        self.tx
            .send(AuditWrite { line, ack })
            .await
            .map_err(|_| anyhow::anyhow!("audit writer is not running"))?;
        done.await
            .map_err(|_| anyhow::anyhow!("audit writer dropped the record"))?
            .context("append audit record")
    }
}

async fn run_writer(mut file: tokio::fs::File, mut rx: mpsc::Receiver<AuditWrite>) {
    // set after a failed write that may have left half a line behind
    let mut torn = false;
    while let Some(write) = rx.recv().await {
        let res = write_line(&mut file, &write.line, torn).await;
        torn = res.is_err();
        if let Err(err) = &res {
            error!(error = %err, "audit append failed");
        }
        let _ = write.ack.send(res);
    }
}

async fn write_line(file: &mut tokio::fs::File, line: &[u8], torn: bool) -> std::io::Result<()> {
    if torn {
        file.write_all(b"\n").await?;
    }
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use planguard_protocol::{parse_action_plan, ErrorCode, UNKNOWN_REQUEST_ID};

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn append_writes_one_redacted_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (log, _writer) = AuditLog::open(&path).await.unwrap();

        let plan = parse_action_plan(
            r#"{"request_id":"req-1","session_id":"s-1","version":"0.1","mode":"execute",
                "confirmation":{"token":"sekrit-token"},
                "actions":[{"type":"write_file","path":"a.txt","content":"sekrit","mode":"0644","reason":"r"}]}"#,
        )
        .unwrap();
        let result = ActionPlanResult {
            request_id: "req-1".to_string(),
            session_id: Some("s-1".to_string()),
            executed: true,
            results: Some(vec![]),
            error: None,
        };
        let peer = Some(PeerCredentials {
            pid: 1,
            uid: 2,
            gid: 3,
        });

        log.append(&AuditRecord::new(10, peer, 99, Some(&plan), &result))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("sekrit"));
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        let record = &lines[0];
        assert_eq!(record["request_id"], "req-1");
        assert_eq!(record["session_id"], "s-1");
        assert_eq!(record["mode"], "execute");
        assert_eq!(record["outcome"], "completed");
        assert_eq!(record["request_bytes"], 99);
        assert_eq!(record["peer"]["uid"], 2);
        assert!(record.get("error").is_none());
    }

    #[tokio::test]
    async fn rejected_record_without_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (log, _writer) = AuditLog::open(&path).await.unwrap();

        let result = ActionPlanResult::rejected(
            UNKNOWN_REQUEST_ID,
            None,
            ErrorCode::ParseFailed,
            "malformed json at line 1 column 2",
        );
        log.append(&AuditRecord::new(10, None, 3, None, &result))
            .await
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines[0]["outcome"], "rejected");
        assert_eq!(lines[0]["error"]["code"], "parse_failed");
        assert!(lines[0].get("plan").is_none());
        assert!(lines[0]["mode"].is_null());
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (log, _writer) = AuditLog::open(&path).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let log = log.clone();
            tasks.push(tokio::spawn(async move {
                let result = ActionPlanResult::rejected(
                    format!("req-{i}"),
                    None,
                    ErrorCode::ValidationFailed,
                    "too many actions",
                );
                log.append(&AuditRecord::new(i, None, 1, None, &result)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 32);
    }

    #[tokio::test]
    async fn existing_log_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "{\"earlier\":true}\n").unwrap();
        let (log, _writer) = AuditLog::open(&path).await.unwrap();

        let result =
            ActionPlanResult::rejected("req-1", None, ErrorCode::RequestTooLarge, "too big");
        log.append(&AuditRecord::new(1, None, 1, None, &result))
            .await
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["earlier"], true);
    }

    #[tokio::test]
    async fn append_fails_once_writer_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let (log, writer) = AuditLog::open(&dir.path().join("audit.jsonl")).await.unwrap();
        writer.abort();
        let _ = writer.await;

        let result = ActionPlanResult::rejected("req-1", None, ErrorCode::ParseFailed, "x");
        assert!(log
            .append(&AuditRecord::new(1, None, 1, None, &result))
            .await
            .is_err());
    }
}
