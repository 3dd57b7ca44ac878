//! RCI daemon entrypoint.
//!
//! Owns one `RciService` for the lifetime of the process: loads the config,
//! starts the file-sync loop, and serves hook invocations over a Unix socket.

use fs_err as fs;
use std::env;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use rci_core::{RciConfig, RciService};

mod server;

const CONFIG_ENV: &str = "RCI_CONFIG";
const SOCKET_ENV: &str = "RCI_SOCKET";
const DEBUG_LOG_ENV: &str = "RCI_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "rci-daemon.log";

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("rci-daemon: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(config.log_dir.as_deref());

    let socket_path = daemon_socket_path(&config);

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let service = match RciService::new(config) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            error!(error = %err, code = err.code(), "Failed to initialize RCI service");
            std::process::exit(1);
        }
    };

    // Initial pass: file hooks load and abandoned jobs reconcile before the
    // socket accepts anything.
    if service.config().file_hooks {
        service.scan();
    }
    if let Err(err) = service.spawn_file_sync() {
        error!(error = %err, "Failed to start file sync thread");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        hooks = service.registry().len(),
        "RCI daemon started"
    );

    server::serve(listener, service);
}

fn load_config() -> Result<RciConfig, String> {
    let path = match env::var_os(CONFIG_ENV) {
        Some(path) => PathBuf::from(path),
        None => match RciConfig::default_path() {
            Some(path) => path,
            None => return Ok(RciConfig::default()),
        },
    };
    RciConfig::load(&path).map_err(|err| err.to_string())
}

/// Installs the global subscriber. The returned guard flushes the file writer
/// on drop and must live as long as the process.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let Some(dir) = log_dir else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return None;
    };

    if let Err(err) = fs::create_dir_all(dir) {
        eprintln!("rci-daemon: failed to create log directory, logging to stderr: {err}");
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Some(guard)
}

fn daemon_socket_path(config: &RciConfig) -> PathBuf {
    match env::var_os(SOCKET_ENV) {
        Some(path) => PathBuf::from(path),
        None => config.socket_path(),
    }
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        warn!(path = %socket_path.display(), "Removing stale daemon socket");
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}
