//! Crash recovery and garbage collection of job artifacts.
//!
//! File sync hands every file under the async directory to
//! [`AsyncEngine::check_artifact`]. For state files of unfinished jobs that no
//! watcher in this process owns, the guard marker is re-established and, once
//! the recorded pid is gone, the job is finished the same way the watcher would
//! have finished it. Independently, any artifact older than the retention window
//! is removed, finished or not.

use std::ffi::OsStr;
use std::path::Path;
use std::time::SystemTime;

use chrono::Utc;
use fs_err as fs;
use tracing::{debug, info, warn};

use crate::error::Result;

use super::engine::AsyncEngine;
use super::store::{read_state_file, write_state_file, STATE_EXTENSION};

/// What happened to one artifact during a scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactOutcome {
    /// An abandoned job was moved to finished.
    pub reconciled: bool,
    /// The file was past retention and deleted.
    pub removed: bool,
    pub failed: bool,
}

impl AsyncEngine {
    pub fn check_artifact(&self, path: &Path, modified: SystemTime) -> ArtifactOutcome {
        let mut outcome = ArtifactOutcome::default();

        if path.extension() == Some(OsStr::new(STATE_EXTENSION)) {
            match self.reconcile_state(path) {
                Ok(reconciled) => outcome.reconciled = reconciled,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to reconcile job state");
                    outcome.failed = true;
                }
            }
        }

        if self.is_expired(modified) {
            match fs::remove_file(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed expired job artifact");
                    outcome.removed = true;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to remove expired job artifact");
                    outcome.failed = true;
                }
            }
        }

        outcome
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.retention)
            .unwrap_or(false)
    }

    /// Returns `true` when an abandoned job was finished.
    fn reconcile_state(&self, path: &Path) -> Result<bool> {
        let state = read_state_file(path)?;
        if state.finished || self.watched().contains(&state.uid) {
            return Ok(false);
        }

        let started_at = state.started_at.unwrap_or_else(Utc::now);
        self.guard.reestablish(&state.hook, &state.uid, started_at);

        if self.probe.is_alive(state.pid) {
            return Ok(false);
        }

        self.guard.release(&state.hook, &state.uid);
        let previous = (!state.error.is_empty()).then(|| state.error.clone());
        let (hook, uid, pid) = (state.hook.clone(), state.uid.clone(), state.pid);
        write_state_file(path, &state.finish(previous))?;

        info!(hook = %hook, uid = %uid, pid, "Reconciled abandoned async job");
        Ok(true)
    }
}
