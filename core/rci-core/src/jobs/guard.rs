//! Single-flight guard: at most one active async job per hook path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{RciError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveHook {
    pub uid: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RunGuard {
    active: Mutex<HashMap<String, ActiveHook>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveHook>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims `hook` for job `uid`, or reports the job already holding it.
    pub fn try_acquire(&self, hook: &str, uid: &str) -> Result<()> {
        let mut active = self.lock();
        if let Some(current) = active.get(hook) {
            let elapsed = Utc::now()
                .signed_duration_since(current.started_at)
                .to_std()
                .unwrap_or_default();
            return Err(RciError::AlreadyRunning {
                hook: hook.to_string(),
                uid: current.uid.clone(),
                elapsed,
            });
        }
        active.insert(
            hook.to_string(),
            ActiveHook {
                uid: uid.to_string(),
                started_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Restores a marker for a job found on disk after a restart. An existing
    /// marker is left alone.
    pub fn reestablish(&self, hook: &str, uid: &str, started_at: DateTime<Utc>) {
        self.lock()
            .entry(hook.to_string())
            .or_insert_with(|| ActiveHook {
                uid: uid.to_string(),
                started_at,
            });
    }

    /// Clears the marker for `hook` if job `uid` owns it.
    pub fn release(&self, hook: &str, uid: &str) -> bool {
        let mut active = self.lock();
        match active.get(hook) {
            Some(current) if current.uid == uid => {
                active.remove(hook);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, hook: &str) -> Option<ActiveHook> {
        self.lock().get(hook).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ActiveHook> {
        self.lock()
            .iter()
            .map(|(hook, marker)| (hook.clone(), marker.clone()))
            .collect()
    }
}
