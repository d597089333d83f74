// ABOUTME: builds the single daemon configuration value from command line flags, env and the policy file.
// ABOUTME: the value is created once at startup and handed to every component that needs it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use crate::policy::PolicyConfig;

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 256 * 1024;

#[derive(Debug, Parser)]
#[command(name = "planguardd", version, about = "Validates, authorizes and executes action plans")]
pub struct Args {
    #[arg(long, env = "PLANGUARDD_SOCKET", default_value = "/tmp/planguardd.sock")]
    pub socket_path: PathBuf,

    #[arg(long, env = "PLANGUARDD_AUDIT", default_value = "./planguardd-audit.jsonl")]
    pub audit_path: PathBuf,

    /// Shared secret that upgrades confirm-required actions. Prefer the env var
    /// or --confirm-token-file so the token does not show up in process listings.
    #[arg(long, env = "PLANGUARDD_CONFIRM_TOKEN", hide_env_values = true)]
    pub confirm_token: Option<String>,

    /// File whose first line is the confirmation token.
    #[arg(long, conflicts_with = "confirm_token")]
    pub confirm_token_file: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_MAX_REQUEST_BYTES)]
    pub max_request_bytes: usize,

    #[arg(long, default_value_t = 2000)]
    pub read_idle_timeout_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub read_deadline_ms: u64,

    /// TOML file with safe_root, exec_allowlist, exec_confirm and exec_deny.
    #[arg(long)]
    pub policy: Option<PathBuf>,
}

#[derive(Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub audit_path: PathBuf,
    pub confirm_token: Option<String>,
    pub max_request_bytes: usize,
    pub read_idle_timeout: Duration,
    pub read_deadline: Duration,
    pub policy: PolicyConfig,
}

impl std::fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("socket_path", &self.socket_path)
            .field("audit_path", &self.audit_path)
            .field("confirm_token", &self.confirm_token.as_ref().map(|_| "[redacted]"))
            .field("max_request_bytes", &self.max_request_bytes)
            .field("read_idle_timeout", &self.read_idle_timeout)
            .field("read_deadline", &self.read_deadline)
            .field("policy", &self.policy)
            .finish()
    }
}

impl DaemonConfig {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let confirm_token = match (&args.confirm_token, &args.confirm_token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => Some(read_token_file(path)?),
            (None, None) => None,
        };
        if confirm_token.as_deref().is_some_and(str::is_empty) {
            anyhow::bail!("confirmation token must be non-empty");
        }

        let policy = match &args.policy {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read policy file {}", path.display()))?;
                PolicyConfig::from_toml_str(&text)
                    .with_context(|| format!("parse policy file {}", path.display()))?
            }
            None => PolicyConfig::default(),
        };

        if args.max_request_bytes == 0 {
            anyhow::bail!("max_request_bytes must be >= 1");
        }
        if args.read_idle_timeout_ms == 0 || args.read_deadline_ms == 0 {
            anyhow::bail!("read timeouts must be >= 1ms");
        }

        Ok(Self {
            socket_path: args.socket_path,
            audit_path: args.audit_path,
            confirm_token,
            max_request_bytes: args.max_request_bytes,
            read_idle_timeout: Duration::from_millis(args.read_idle_timeout_ms),
            read_deadline: Duration::from_millis(args.read_deadline_ms),
            policy,
        })
    }
}

fn read_token_file(path: &std::path::Path) -> anyhow::Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read confirmation token file {}", path.display()))?;
    Ok(text.lines().next().unwrap_or("").to_string())
}
