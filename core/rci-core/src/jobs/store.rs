//! On-disk job artifacts.
//!
//! Each job owns two files in the async directory, keyed by its uid:
//!
//! ```text
//! async/
//! ├── {uid}.json   # JobState, rewritten whole on every transition
//! └── {uid}.log    # combined stdout/stderr of the job, append-only
//! ```
//!
//! State writes go through a temp file + rename so a concurrent reader sees
//! either the previous record or the new one, never a torn write.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{RciError, Result};

pub const STATE_EXTENSION: &str = "json";
pub const LOG_EXTENSION: &str = "log";

/// Persisted record of one async job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub uid: String,
    pub hook: String,
    pub command: String,
    pub pid: u32,
    pub finished: bool,
    /// Exit error text; empty when none.
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn started(uid: &str, hook: &str, command: &str, pid: u32) -> Self {
        JobState {
            uid: uid.to_string(),
            hook: hook.to_string(),
            command: command.to_string(),
            pid,
            finished: false,
            error: String::new(),
            started_at: Some(Utc::now()),
        }
    }

    pub fn finish(mut self, error: Option<String>) -> Self {
        self.finished = true;
        self.error = error.unwrap_or_default();
        self
    }
}

/// Job ids are generated by us; anything else coming back from a caller is
/// rejected before it can name a path outside the store.
pub fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 64 && uid.chars().all(|c| c.is_ascii_alphanumeric())
}

#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JobStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| RciError::fs("create async job directory", err))
    }

    pub fn state_path(&self, uid: &str) -> PathBuf {
        self.dir.join(format!("{uid}.{STATE_EXTENSION}"))
    }

    pub fn log_path(&self, uid: &str) -> PathBuf {
        self.dir.join(format!("{uid}.{LOG_EXTENSION}"))
    }

    /// Opens (creating if needed) the job's log for appending.
    pub fn open_log(&self, uid: &str) -> Result<File> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(uid))
            .map(fs::File::into_file)
            .map_err(|err| RciError::fs("open job log", err))
    }

    pub fn write_state(&self, state: &JobState) -> Result<()> {
        write_state_file(&self.state_path(&state.uid), state)
    }

    pub fn read_state(&self, uid: &str) -> Result<JobState> {
        read_state_file(&self.state_path(uid))
    }

    pub fn read_log(&self, uid: &str) -> Result<String> {
        let path = self.log_path(uid);
        fs::read_to_string(&path).map_err(|source| RciError::LogReadFailed { path, source })
    }
}

pub fn write_state_file(path: &Path, state: &JobState) -> Result<()> {
    let write_failed = |source: std::io::Error| RciError::StateWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let payload = serde_json::to_vec(state).map_err(|err| write_failed(err.into()))?;
    let parent = path
        .parent()
        .ok_or_else(|| write_failed(std::io::Error::other("state path has no parent")))?;

    let mut temp_file = NamedTempFile::new_in(parent).map_err(write_failed)?;
    temp_file.write_all(&payload).map_err(write_failed)?;
    temp_file.flush().map_err(write_failed)?;
    temp_file
        .persist(path)
        .map_err(|err| write_failed(err.error))?;
    Ok(())
}

pub fn read_state_file(path: &Path) -> Result<JobState> {
    let read_failed = |details: String| RciError::StateReadFailed {
        path: path.to_path_buf(),
        details,
    };

    let data = fs::read(path).map_err(|err| read_failed(err.to_string()))?;
    serde_json::from_slice(&data).map_err(|err| read_failed(err.to_string()))
}
