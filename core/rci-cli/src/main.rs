//! rci: command-line client for the rci daemon.
//!
//! ## Subcommands
//!
//! - `health`: daemon status, hook count and running async hooks
//! - `run`: invoke a hook (async hooks print the job id)
//! - `result`: poll an async job by id
//! - `register`: register a shell-script hook from a JSON definition file
//! - `hooks`: list every registered hook

mod daemon_client;
mod logging;

use clap::{Parser, Subcommand};
use daemon_client::DaemonClient;
use fs_err as fs;
use rci_core::RESULT_ARG;
use rci_daemon_protocol::{Method, RegisterParams, RunParams};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rci")]
#[command(about = "Remote command interface client")]
#[command(version)]
struct Cli {
    /// Daemon socket (defaults to RCI_SOCKET, then the configured instance)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Seconds to wait for a reply; sync hooks block until they exit
    #[arg(long, global = true, default_value_t = 300)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon health
    Health,

    /// Run a hook
    Run {
        /// Hook path, e.g. /rci/ping
        #[arg(value_name = "HOOK")]
        hook: String,

        /// Argument passed to the hook (repeatable)
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        args: Vec<(String, String)>,

        /// Opaque token forwarded to built-in hooks
        #[arg(long)]
        token: Option<String>,
    },

    /// Poll the result of an async job
    Result {
        #[arg(value_name = "HOOK")]
        hook: String,

        #[arg(value_name = "UID")]
        uid: String,
    },

    /// Register a shell-script hook from a JSON definition file
    Register {
        #[arg(value_name = "HOOK")]
        path: String,

        #[arg(value_name = "FILE")]
        definition: PathBuf,
    },

    /// List registered hooks
    Hooks,
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        tracing::debug!(error = %err, "rci command failed");
        eprintln!("rci: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let socket = DaemonClient::resolve_socket(cli.socket)?;
    let client = DaemonClient::new(socket, Duration::from_secs(cli.timeout.max(1)));

    let (method, params) = match cli.command {
        Commands::Health => (Method::GetHealth, None),
        Commands::Hooks => (Method::ListHooks, None),
        Commands::Run { hook, args, token } => {
            let params = RunParams {
                hook,
                token,
                args: args.into_iter().collect(),
            };
            (Method::Run, Some(to_value(&params)?))
        }
        Commands::Result { hook, uid } => {
            let params = RunParams {
                hook,
                token: None,
                args: HashMap::from([(RESULT_ARG.to_string(), uid)]),
            };
            (Method::Run, Some(to_value(&params)?))
        }
        Commands::Register { path, definition } => {
            let body = fs::read_to_string(&definition).map_err(|err| err.to_string())?;
            let definition: Value = serde_json::from_str(&body)
                .map_err(|err| format!("{} is not valid JSON: {}", definition.display(), err))?;
            let params = RegisterParams { path, definition };
            (Method::Register, Some(to_value(&params)?))
        }
    };

    let data = client.call(method, params)?;
    let rendered = serde_json::to_string_pretty(&data)
        .map_err(|err| format!("Failed to render response: {}", err))?;
    println!("{rendered}");
    Ok(())
}

fn to_value<T: serde::Serialize>(params: &T) -> Result<Value, String> {
    serde_json::to_value(params).map_err(|err| format!("Failed to encode params: {}", err))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
