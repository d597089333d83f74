// ABOUTME: hosts the unix socket server for receiving action plans and returning structured results.
// ABOUTME: enforces framing limits, strict parsing, validation, policy checks, and audit logging.

use std::future::Future;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use planguard_protocol::validate::MAX_EXEC_TIMEOUT_SEC;
use planguard_protocol::{
    echo_request_id, parse, salvage_request_id, serialize, validate, ActionPlan, ActionPlanResult,
    ErrorCode, RequestError, UNKNOWN_REQUEST_ID,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, AuditRecord, PeerCredentials};
use crate::config::DaemonConfig;
use crate::dispatch;

/// Long enough for one in-flight exec at its maximum timeout to finish and be audited.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(MAX_EXEC_TIMEOUT_SEC + 5);

/// Serves until `shutdown` resolves, then stops accepting, waits up to
/// [`SHUTDOWN_GRACE`] for accepted connections to finish and removes the socket file.
pub async fn serve<F>(config: Arc<DaemonConfig>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let socket_path = config.socket_path.clone();
    remove_stale_socket(&socket_path).await?;

    let (audit, writer) = AuditLog::open(&config.audit_path).await?;

    let listener = bind_owner_only(&socket_path)?;
    tokio::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
        .await
        .with_context(|| format!("chmod {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), audit = %config.audit_path.display(), "listening");

    let mut handlers = JoinSet::new();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let config = Arc::clone(&config);
                let audit = audit.clone();
                handlers.spawn(async move {
                    if let Err(err) = handle_client(stream, &config, &audit).await {
                        debug!(error = %err, "connection ended without a response");
                    }
                });
            }
        }
    }

    drop(listener);
    if let Err(err) = tokio::fs::remove_file(&socket_path).await {
        warn!(error = %err, "could not remove socket file");
    }

    if !handlers.is_empty() {
        info!(in_flight = handlers.len(), "waiting for in-flight requests");
    }
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while handlers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        error!(abandoned = handlers.len(), "in-flight requests did not finish before shutdown");
        handlers.shutdown().await;
    }

    drop(audit);
    if let Err(err) = writer.await {
        error!(error = %err, "audit writer task failed");
    }
    info!("stopped");
    Ok(())
}

/// Binds with a umask that keeps the socket owner-only until the chmod lands.
fn bind_owner_only(socket_path: &Path) -> anyhow::Result<UnixListener> {
    // SAFETY: umask only swaps the process file-creation mask and cannot fail.
    let previous = unsafe { libc::umask(0o077) };
    let bound = UnixListener::bind(socket_path);
    // SAFETY: as above.
    unsafe {
        libc::umask(previous);
    }
    bound.with_context(|| format!("bind {}", socket_path.display()))
}

/// Removes a socket left behind by an earlier run. Anything that is not a
/// socket is left alone.
async fn remove_stale_socket(path: &Path) -> anyhow::Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("stat {}", path.display()));
        }
    };
    if !meta.file_type().is_socket() {
        anyhow::bail!("{} exists and is not a socket", path.display());
    }
    tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("remove existing socket at {}", path.display()))
}

#[derive(Debug)]
enum Frame {
    Complete(Vec<u8>),
    /// Carries the number of bytes seen, all of which were discarded.
    TooLarge(usize),
    TimedOutEmpty,
}

/// Reads one request: until EOF, an idle gap, or the total deadline.
async fn read_frame(stream: &mut UnixStream, config: &DaemonConfig) -> std::io::Result<Frame> {
    let deadline = Instant::now() + config.read_deadline;
    let mut input = Vec::new();
    let mut seen = 0usize;
    let mut exceeded = false;
    let mut timed_out = false;
    let mut buf = [0u8; 4096];
    loop {
        let wait = config
            .read_idle_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let n = match tokio::time::timeout(wait, stream.read(&mut buf)).await {
            Ok(res) => res?,
            Err(_) => {
                timed_out = true;
                break;
            }
        };
        if n == 0 {
            break;
        }
        seen += n;
        if exceeded {
            continue;
        }
        if input.len() + n > config.max_request_bytes {
            exceeded = true;
            input = Vec::new();
            continue;
        }
        input.extend_from_slice(&buf[..n]);
    }

    if exceeded {
        return Ok(Frame::TooLarge(seen));
    }
    if timed_out && input.is_empty() {
        return Ok(Frame::TimedOutEmpty);
    }
    Ok(Frame::Complete(input))
}

async fn handle_client(
    mut stream: UnixStream,
    config: &DaemonConfig,
    audit: &AuditLog,
) -> anyhow::Result<()> {
    let peer = peer_credentials(&stream);

    let frame = read_frame(&mut stream, config).await?;
    let (request_bytes, plan, mut response) = match frame {
        Frame::TooLarge(seen) => (
            seen,
            None,
            ActionPlanResult::rejected(
                UNKNOWN_REQUEST_ID,
                None,
                ErrorCode::RequestTooLarge,
                "request exceeds max bytes",
            ),
        ),
        Frame::TimedOutEmpty => (
            0,
            None,
            ActionPlanResult::rejected(
                UNKNOWN_REQUEST_ID,
                None,
                ErrorCode::ParseFailed,
                "read timed out",
            ),
        ),
        Frame::Complete(input) => {
            let (plan, response) = process(&input, config).await;
            (input.len(), plan, response)
        }
    };

    match &response.error {
        None => info!(
            request_id = %response.request_id,
            mode = plan.as_ref().map(|p| p.mode.as_str()).unwrap_or_default(),
            actions = response.results().len(),
            executed = response.executed,
            "request completed"
        ),
        Some(err) => warn!(
            request_id = %response.request_id,
            code = err.code.as_str(),
            "request rejected"
        ),
    }

    let record = AuditRecord::new(now_unix_ms(), peer, request_bytes, plan.as_ref(), &response);
    if let Err(err) = audit.append(&record).await {
        error!(request_id = %response.request_id, error = %err, "audit append failed");
        if response.error.is_none() {
            response.error = Some(RequestError {
                code: ErrorCode::AuditFailed,
                message: "audit record could not be written".to_string(),
            });
        }
    }

    let response_json = serialize(&response)?;
    stream.write_all(&response_json).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Parses, validates and dispatches one framed request. The parsed plan is
/// returned alongside the response so it can be audited.
async fn process(input: &[u8], config: &DaemonConfig) -> (Option<ActionPlan>, ActionPlanResult) {
    let plan = match parse(input) {
        Ok(p) => p,
        Err(err) => {
            let response = ActionPlanResult::rejected(
                salvage_request_id(input),
                None,
                ErrorCode::ParseFailed,
                format!("parse failed: {err}"),
            );
            return (None, response);
        }
    };

    let request_id = echo_request_id(&plan.request_id);
    let session_id = plan
        .session_id
        .clone()
        .filter(|s| s.len() <= planguard_protocol::validate::MAX_SESSION_ID_BYTES);

    let validated = match validate(plan.clone()) {
        Ok(v) => v,
        Err(err) => {
            let response = ActionPlanResult::rejected(request_id, session_id, err.code, err.message);
            return (Some(plan), response);
        }
    };

    let outcome = dispatch::dispatch(&validated, config).await;
    let response = ActionPlanResult {
        request_id,
        session_id,
        executed: outcome.executed,
        results: Some(outcome.results),
        error: None,
    };
    (Some(plan), response)
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    let fd = stream.as_raw_fd();

    // SAFETY: ucred is plain old data and getsockopt writes at most `len` bytes into it.
    let mut ucred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut ucred as *mut libc::ucred).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return None;
    }
    if len as usize != std::mem::size_of::<libc::ucred>() {
        return None;
    }

    Some(PeerCredentials {
        pid: ucred.pid,
        uid: ucred.uid,
        gid: ucred.gid,
    })
}
