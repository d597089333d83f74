// ABOUTME: implements bounded read_file and write_file actions for the daemon.
// ABOUTME: uses base64 for file content transport to keep responses deterministic for binary data.

use std::path::Path;

use base64::Engine;
use planguard_protocol::{
    ActionError, ActionErrorCode, ActionResult, ReadFileAction, ReadFileResult, WriteFileAction,
    WriteFileResult,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Reads at most `max_bytes` from `path`; one extra byte is read to detect truncation.
pub async fn read(read: &ReadFileAction, path: &Path) -> ActionResult {
    let data = match read_bounded(path, read.max_bytes).await {
        Ok(d) => d,
        Err(err) => {
            return ActionResult::ReadFile(ReadFileResult {
                ok: false,
                content_base64: None,
                truncated: false,
                error: Some(ActionError::new(
                    ActionErrorCode::ReadFailed,
                    format!("read failed: {err}"),
                )),
            })
        }
    };

    let max = read.max_bytes as usize;
    let truncated = data.len() > max;
    let slice = if truncated { &data[..max] } else { &data[..] };

    let content_base64 = base64::engine::general_purpose::STANDARD.encode(slice);
    ActionResult::ReadFile(ReadFileResult {
        ok: true,
        content_base64: Some(content_base64),
        truncated,
        error: None,
    })
}

async fn read_bounded(path: &Path, max_bytes: u64) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut data = Vec::new();
    file.take(max_bytes + 1).read_to_end(&mut data).await?;
    Ok(data)
}

/// Writes `content` to `path` and applies the requested permission bits.
/// The mode string is checked before the file is touched.
pub async fn write(write: &WriteFileAction, path: &Path) -> ActionResult {
    let mode = match parse_mode(&write.mode) {
        Ok(m) => m,
        Err(err) => return write_failed(err),
    };

    if let Err(err) = write_contents(path, write.content.as_bytes(), mode).await {
        return write_failed(ActionError::new(
            ActionErrorCode::WriteFailed,
            format!("write failed: {err}"),
        ));
    }

    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    if let Err(err) = tokio::fs::set_permissions(path, perms).await {
        return write_failed(ActionError::new(
            ActionErrorCode::WriteFailed,
            format!("chmod failed: {err}"),
        ));
    }

    ActionResult::WriteFile(WriteFileResult {
        ok: true,
        artifacts: vec![path.display().to_string()],
        error: None,
    })
}

async fn write_contents(path: &Path, content: &[u8], mode: u32) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .await?;
    file.write_all(content).await?;
    file.flush().await?;
    Ok(())
}

fn write_failed(error: ActionError) -> ActionResult {
    ActionResult::WriteFile(WriteFileResult {
        ok: false,
        artifacts: vec![],
        error: Some(error),
    })
}

/// Accepts `0644`, `644` and `0o644`. Anything beyond the permission and
/// special bits is refused.
pub fn parse_mode(mode: &str) -> Result<u32, ActionError> {
    let invalid = || {
        ActionError::new(
            ActionErrorCode::InvalidModeString,
            "mode must be an octal string like 0644",
        )
    };
    let mode = mode.trim();
    let mode = mode.strip_prefix("0o").unwrap_or(mode);
    if mode.is_empty() || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(invalid());
    }
    match u32::from_str_radix(mode, 8) {
        Ok(m) if m <= 0o7777 => Ok(m),
        _ => Err(invalid()),
    }
}
