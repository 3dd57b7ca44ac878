//! Detached shell jobs.
//!
//! A start request claims the single-flight guard, spawns `sh -c <script>` with
//! both output streams appended to the job log, persists the initial state and
//! returns the job id. A watcher thread per job waits for exit, releases the
//! guard and persists the final state.
//!
//! ```text
//! start ──► guard claimed ──► spawned ──► state {finished: false} ──► {uid}
//!                                              │
//!                              watcher: wait ──┴──► release guard ──► state {finished: true}
//! ```

use std::collections::{BTreeMap, HashSet};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::{RciError, Result};
use crate::liveness::ProcessProbe;
use crate::types::{Args, Hook, HookFailed, JobResult, StartOk, RESULT_ARG};

use super::guard::{ActiveHook, RunGuard};
use super::store::{is_valid_uid, JobState, JobStore};

pub(crate) const SHELL: &str = "sh";

// Values of the `where` field in failure replies.
pub const STAGE_CHECK_RUNNING: &str = "check running";
pub const STAGE_OPEN_LOG: &str = "open log file";
pub const STAGE_SCRIPT_START: &str = "script start";
pub const STAGE_WRITE_STATE: &str = "write state file";
pub const STAGE_READ_STATE: &str = "read state file";
pub const STAGE_READ_LOG: &str = "read log file";

/// An async-path failure, reported to callers as `{uid, where, error}`.
#[derive(Debug)]
pub struct JobFailure {
    pub uid: String,
    pub stage: &'static str,
    pub error: RciError,
}

impl JobFailure {
    fn new(uid: &str, stage: &'static str, error: RciError) -> Self {
        JobFailure {
            uid: uid.to_string(),
            stage,
            error,
        }
    }

    pub fn reply(&self) -> HookFailed {
        HookFailed {
            uid: self.uid.clone(),
            stage: self.stage.to_string(),
            error: self.error.to_string(),
        }
    }
}

pub struct AsyncEngine {
    pub(super) store: JobStore,
    pub(super) guard: Arc<RunGuard>,
    pub(super) probe: Arc<dyn ProcessProbe>,
    pub(super) retention: Duration,
    /// Jobs whose watcher lives in this process.
    pub(super) watched: Arc<Mutex<HashSet<String>>>,
}

impl AsyncEngine {
    pub fn new(store: JobStore, probe: Arc<dyn ProcessProbe>, retention: Duration) -> Self {
        AsyncEngine {
            store,
            guard: Arc::new(RunGuard::new()),
            probe,
            retention,
            watched: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn guard(&self) -> &RunGuard {
        &self.guard
    }

    pub fn running(&self) -> BTreeMap<String, ActiveHook> {
        self.guard.snapshot()
    }

    pub(super) fn watched(&self) -> MutexGuard<'_, HashSet<String>> {
        lock_watched(&self.watched)
    }

    /// Async entry point: polls when `args["result"]` is set, starts a job otherwise.
    ///
    /// Only [`RciError::EmptyExecuteList`] escapes as a plain error; every other
    /// failure is encoded into the reply body.
    pub fn run(&self, hook: &Hook, args: &Args) -> Result<Vec<u8>> {
        if let Some(uid) = args.get(RESULT_ARG).filter(|uid| !uid.is_empty()) {
            return match self.result(uid) {
                Ok(result) => encode(&result, "job result"),
                Err(failure) => self.encode_failure(&hook.hook, failure),
            };
        }

        if hook.data.execute.is_empty() {
            return Err(RciError::EmptyExecuteList(hook.hook.clone()));
        }

        match self.start(hook) {
            Ok(uid) => encode(&StartOk { uid }, "start reply"),
            Err(failure) => self.encode_failure(&hook.hook, failure),
        }
    }

    fn encode_failure(&self, hook: &str, failure: JobFailure) -> Result<Vec<u8>> {
        warn!(
            hook = %hook,
            uid = %failure.uid,
            stage = failure.stage,
            error = %failure.error,
            "Async hook failed"
        );
        encode(&failure.reply(), "failure reply")
    }

    /// Starts `hook` as a detached job and returns its id.
    pub fn start(&self, hook: &Hook) -> std::result::Result<String, JobFailure> {
        let uid = Ulid::new().to_string();
        if hook.data.execute.is_empty() {
            return Err(JobFailure::new(
                &uid,
                STAGE_SCRIPT_START,
                RciError::EmptyExecuteList(hook.hook.clone()),
            ));
        }

        if let Err(error) = self.guard.try_acquire(&hook.hook, &uid) {
            let running_uid = match &error {
                RciError::AlreadyRunning { uid, .. } => uid.clone(),
                _ => uid.clone(),
            };
            return Err(JobFailure::new(&running_uid, STAGE_CHECK_RUNNING, error));
        }

        let script = hook.data.execute.join("\n");
        let child = match self.spawn(&uid, &script) {
            Ok(child) => child,
            Err((stage, error)) => {
                self.guard.release(&hook.hook, &uid);
                return Err(JobFailure::new(&uid, stage, error));
            }
        };

        // Claimed before the state file exists so a concurrent scan never
        // mistakes this job for an abandoned one.
        lock_watched(&self.watched).insert(uid.clone());
        let state = JobState::started(&uid, &hook.hook, &script, child.id());
        let persisted = self.store.write_state(&state);
        self.watch(child, state);

        if let Err(error) = persisted {
            // The process keeps running; the caller learns about it from the error.
            self.guard.release(&hook.hook, &uid);
            return Err(JobFailure::new(&uid, STAGE_WRITE_STATE, error));
        }

        info!(hook = %hook.hook, uid = %uid, "Async hook started");
        Ok(uid)
    }

    fn spawn(
        &self,
        uid: &str,
        script: &str,
    ) -> std::result::Result<Child, (&'static str, RciError)> {
        let log = self
            .store
            .open_log(uid)
            .map_err(|error| (STAGE_OPEN_LOG, error))?;
        let log_err = log.try_clone().map_err(|err| {
            (
                STAGE_OPEN_LOG,
                RciError::fs(format!("duplicate job log handle for {uid}"), err),
            )
        })?;

        Command::new(SHELL)
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|source| {
                (
                    STAGE_SCRIPT_START,
                    RciError::ProcessSpawnFailed {
                        command: script.to_string(),
                        source,
                    },
                )
            })
    }

    fn watch(&self, child: Child, state: JobState) {
        let uid = state.uid.clone();
        let slot = Arc::new(Mutex::new(Some(JobWatch {
            child,
            state,
            store: self.store.clone(),
            guard: Arc::clone(&self.guard),
            watched: Arc::clone(&self.watched),
        })));
        let thread_slot = Arc::clone(&slot);

        let spawned = thread::Builder::new()
            .name(format!("rci-job-{uid}"))
            .spawn(move || {
                if let Some(job) = take_watch(&thread_slot) {
                    job.wait();
                }
            });

        // A failed spawn drops the closure unrun and the job is still in the
        // slot. It must be reaped here: a zombie looks alive to recovery.
        if let Err(err) = spawned {
            warn!(uid = %uid, error = %err, "Failed to spawn job watcher; waiting inline");
            if let Some(job) = take_watch(&slot) {
                job.wait();
            }
        }
    }

    /// Reads a job's state and log for a result poll.
    pub fn result(&self, uid: &str) -> std::result::Result<JobResult, JobFailure> {
        if !is_valid_uid(uid) {
            return Err(JobFailure::new(
                uid,
                STAGE_READ_STATE,
                RciError::InvalidJobId(uid.to_string()),
            ));
        }

        let state = self
            .store
            .read_state(uid)
            .map_err(|error| JobFailure::new(uid, STAGE_READ_STATE, error))?;
        let log = self
            .store
            .read_log(uid)
            .map_err(|error| JobFailure::new(uid, STAGE_READ_LOG, error))?;

        debug!(uid = %uid, finished = state.finished, "Async result polled");
        Ok(JobResult {
            finished: state.finished,
            error: state.error,
            log: log.split('\n').map(str::to_string).collect(),
        })
    }
}

/// Everything a watcher needs to finish one job.
struct JobWatch {
    child: Child,
    state: JobState,
    store: JobStore,
    guard: Arc<RunGuard>,
    watched: Arc<Mutex<HashSet<String>>>,
}

impl JobWatch {
    /// Waits for exit, releases the guard and persists the final state.
    fn wait(mut self) {
        let error = wait_for_exit(&mut self.child);
        self.guard.release(&self.state.hook, &self.state.uid);

        let hook = self.state.hook.clone();
        let finished = self.state.finish(error);
        match self.store.write_state(&finished) {
            Ok(()) => info!(
                hook = %hook,
                uid = %finished.uid,
                error = %finished.error,
                "Async hook finished"
            ),
            Err(err) => warn!(
                hook = %hook,
                uid = %finished.uid,
                error = %err,
                "Failed to persist finished job state"
            ),
        }
        lock_watched(&self.watched).remove(&finished.uid);
    }
}

fn take_watch(slot: &Mutex<Option<JobWatch>>) -> Option<JobWatch> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

/// Blocks until the job exits and returns its error text, if any.
///
/// Jobs run to completion; a timeout would slot in here without touching the
/// state format.
fn wait_for_exit(child: &mut Child) -> Option<String> {
    match child.wait() {
        Ok(status) if status.success() => None,
        Ok(status) => Some(status.to_string()),
        Err(err) => Some(err.to_string()),
    }
}

fn lock_watched(watched: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    watched
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn encode<T: Serialize>(value: &T, context: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| RciError::Serialization {
        context: context.to_string(),
        source,
    })
}
