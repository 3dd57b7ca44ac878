//! Error types for rci-core operations.

use std::path::PathBuf;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Core Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur in rci-core operations.
///
/// Dispatcher-level variants are returned to callers as plain errors. The async
/// engine folds its variants into a structured `{uid, where, error}` reply instead
/// (see [`crate::jobs::JobFailure`]).
#[derive(Debug, thiserror::Error)]
pub enum RciError {
    // ─────────────────────────────────────────────────────────────────────
    // Registry / Dispatch Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("hook '{0}' already registered")]
    AlreadyRegistered(String),

    #[error("hook '{0}' does not exist")]
    HookNotFound(String),

    #[error("unsupported command type '{kind}' of hook '{hook}'")]
    UnsupportedCommandType { hook: String, kind: String },

    #[error("built-in hook '{0}' has no registered handler")]
    HandlerMissing(String),

    #[error("empty 'execute' of hook '{0}'")]
    EmptyExecuteList(String),

    // ─────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("hook '{hook}' is already running as job {uid} for {elapsed:.3?}")]
    AlreadyRunning {
        hook: String,
        uid: String,
        elapsed: Duration,
    },

    #[error("failed to start '{command}': {source}")]
    ProcessSpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Job Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("invalid job id '{0}'")]
    InvalidJobId(String),

    #[error("failed to write job state {path}: {source}")]
    StateWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read job state {path}: {details}")]
    StateReadFailed { path: PathBuf, details: String },

    #[error("failed to read job log {path}: {source}")]
    LogReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // File Sync / Config Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("malformed hook definition {path}: {details}")]
    DefinitionParseFailed { path: PathBuf, details: String },

    #[error("{context}: {source}")]
    FileSystem {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration file malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("failed to encode {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RciError {
    /// Stable machine-readable code, used on the wire by the daemon.
    pub fn code(&self) -> &'static str {
        match self {
            RciError::AlreadyRegistered(_) => "already_registered",
            RciError::HookNotFound(_) => "hook_not_found",
            RciError::UnsupportedCommandType { .. } => "unsupported_command_type",
            RciError::HandlerMissing(_) => "handler_missing",
            RciError::EmptyExecuteList(_) => "empty_execute_list",
            RciError::AlreadyRunning { .. } => "already_running",
            RciError::ProcessSpawnFailed { .. } => "process_spawn_failed",
            RciError::InvalidJobId(_) => "invalid_job_id",
            RciError::StateWriteFailed { .. } => "state_write_failed",
            RciError::StateReadFailed { .. } => "state_read_failed",
            RciError::LogReadFailed { .. } => "log_read_failed",
            RciError::DefinitionParseFailed { .. } => "definition_parse_failed",
            RciError::FileSystem { .. } => "file_system_error",
            RciError::Config { .. } => "config_error",
            RciError::Serialization { .. } => "serialization_error",
        }
    }

    pub(crate) fn fs(context: impl Into<String>, source: std::io::Error) -> Self {
        RciError::FileSystem {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using RciError.
pub type Result<T> = std::result::Result<T, RciError>;

impl From<RciError> for String {
    fn from(err: RciError) -> String {
        err.to_string()
    }
}
