// ABOUTME: executes the exec action by spawning a subprocess with bounded runtime and output.
// ABOUTME: returns structured results suitable for deterministic consumption by planguard.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use planguard_protocol::{ActionError, ActionErrorCode, ActionResult, ExecAction, ExecResult};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

pub const MAX_STDIO_BYTES: usize = 8192;

/// How long pipes may stay open once the child itself has exited.
const PIPE_GRACE: Duration = Duration::from_millis(250);

type Captured = ((Vec<u8>, bool), (Vec<u8>, bool));

/// Runs argv with a cleared environment plus `exec.env`, in `cwd` when given.
pub async fn run(exec: &ExecAction, cwd: Option<&Path>) -> ActionResult {
    let program = match exec.argv.first() {
        Some(p) => p,
        None => return failed(ActionErrorCode::ExecFailed, "missing argv[0]".to_string()),
    };

    let mut cmd = Command::new(program);
    cmd.args(&exec.argv[1..])
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    if let Some(env) = &exec.env {
        cmd.envs(env);
    }
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(err) => return failed(ActionErrorCode::ExecFailed, format!("spawn failed: {err}")),
    };

    let pgid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let readers = tokio::spawn(async move { tokio::join!(read_capped(stdout), read_capped(stderr)) });

    let waited = tokio::time::timeout(Duration::from_secs(exec.timeout_sec), child.wait()).await;
    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            kill_group(&mut child).await;
            readers.abort();
            return failed(ActionErrorCode::ExecFailed, format!("wait failed: {err}"));
        }
        Err(_) => {
            kill_group(&mut child).await;
            readers.abort();
            return failed(ActionErrorCode::ExecTimedOut, "exec timed out".to_string());
        }
    };

    let ((stdout, stdout_truncated), (stderr, stderr_truncated)) = drain(readers, pgid).await;

    let error = if status.success() {
        None
    } else if let Some(code) = status.code() {
        Some(ActionError::new(
            ActionErrorCode::ExecFailed,
            format!("process exited with status {code}"),
        ))
    } else {
        let signal = status.signal().unwrap_or_default();
        Some(ActionError::new(
            ActionErrorCode::ExecFailed,
            format!("process terminated by signal {signal}"),
        ))
    };

    ActionResult::Exec(ExecResult {
        ok: status.success(),
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stdout_truncated,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        stderr_truncated,
        error,
    })
}

fn failed(code: ActionErrorCode, message: String) -> ActionResult {
    ActionResult::Exec(ExecResult {
        ok: false,
        exit_code: None,
        stdout: String::new(),
        stdout_truncated: false,
        stderr: String::new(),
        stderr_truncated: false,
        error: Some(ActionError::new(code, message)),
    })
}

/// The child leads its own process group, so this also reaches anything it forked.
async fn kill_group(child: &mut Child) {
    kill_pgid(child.id());
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn kill_pgid(pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        // SAFETY: killpg only sends a signal; an empty group yields ESRCH.
        unsafe {
            libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
        }
    }
}

/// Collects output after the child exited. Descendants left in the group
/// that still hold the pipes are killed once the grace period runs out.
async fn drain(mut readers: JoinHandle<Captured>, pgid: Option<u32>) -> Captured {
    if let Ok(joined) = tokio::time::timeout(PIPE_GRACE, &mut readers).await {
        return joined.unwrap_or_default();
    }

    debug!(?pgid, "pipes still open after exit, killing process group");
    kill_pgid(pgid);
    match tokio::time::timeout(PIPE_GRACE, &mut readers).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            readers.abort();
            Captured::default()
        }
    }
}

/// Keeps the first MAX_STDIO_BYTES and drains the rest so the child never
/// blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>) -> (Vec<u8>, bool) {
    let mut reader = match reader {
        Some(r) => r,
        None => return (Vec::new(), false),
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let room = MAX_STDIO_BYTES - kept.len();
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    (kept, truncated)
}
