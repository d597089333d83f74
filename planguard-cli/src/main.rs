// ABOUTME: provides a user-facing cli for sending action plans to the local planguardd daemon.
// ABOUTME: prints deterministic json responses returned by the daemon.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use planguard_protocol::Mode;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use planguard_cli::{ping_plan, prepare_send, send, validate_verdict};

#[derive(Debug, Parser)]
#[command(name = "planguard", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    PlanOnly,
    Execute,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::PlanOnly => Mode::PlanOnly,
            ModeArg::Execute => Mode::Execute,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a plan locally, then send it. Reads stdin without --file/--json.
    Send {
        #[arg(long, env = "PLANGUARDD_SOCKET", default_value = "/tmp/planguardd.sock")]
        socket_path: PathBuf,

        #[arg(long)]
        request_id: Option<String>,

        #[arg(long)]
        session_id: Option<String>,

        #[arg(long, conflicts_with = "json")]
        file: Option<PathBuf>,

        #[arg(long)]
        json: Option<String>,
    },
    Ping {
        #[arg(long, env = "PLANGUARDD_SOCKET", default_value = "/tmp/planguardd.sock")]
        socket_path: PathBuf,

        #[arg(long, default_value = "req-ping-cli-1")]
        request_id: String,

        #[arg(long)]
        session_id: Option<String>,

        #[arg(long, value_enum, default_value_t = ModeArg::Execute)]
        mode: ModeArg,
    },
    /// Print {"ok": ..., "error": ...} without contacting the daemon.
    Validate {
        #[arg(long, conflicts_with = "json")]
        file: Option<PathBuf>,

        #[arg(long)]
        json: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("planguard_cli=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Send {
            socket_path,
            request_id,
            session_id,
            file,
            json,
        } => {
            let input = read_input(file.as_deref(), json.as_deref()).await?;
            let plan = prepare_send(&input, request_id.as_deref(), session_id.as_deref())?;
            let response = send(&socket_path, &plan).await?;
            print!("{response}");
        }
        Command::Ping {
            socket_path,
            request_id,
            session_id,
            mode,
        } => {
            let plan = ping_plan(&request_id, session_id.as_deref(), mode.into())?;
            let response = send(&socket_path, &plan).await?;
            print!("{response}");
        }
        Command::Validate { file, json } => {
            let input = read_input(file.as_deref(), json.as_deref()).await?;
            let verdict = validate_verdict(&input);
            print!("{}", serde_json::to_string_pretty(&verdict)?);
        }
    }

    Ok(())
}

async fn read_input(file: Option<&Path>, json: Option<&str>) -> anyhow::Result<String> {
    if let Some(json) = json {
        return Ok(json.to_string());
    }

    if let Some(file) = file {
        return Ok(tokio::fs::read_to_string(file).await?);
    }

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    Ok(input)
}
