//! The agent context: registry, engines and file sync behind one dispatcher.
//!
//! One [`RciService`] is created per agent instance and shared by reference (or
//! `Arc`) with every caller. It owns no locks of its own; concurrency lives in
//! the registry, the run guard and the job store.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::builtin::{self, BuiltinHandler};
use crate::config::RciConfig;
use crate::error::{RciError, Result};
use crate::exec;
use crate::jobs::{ActiveHook, AsyncEngine, JobStore};
use crate::liveness::{ProcessProbe, SystemProbe};
use crate::registry::HookRegistry;
use crate::reload::{FileSync, ScanReport};
use crate::types::{Args, Hook, HookType};

pub struct RciService {
    config: RciConfig,
    registry: HookRegistry,
    jobs: AsyncEngine,
    sync: FileSync,
}

impl RciService {
    pub fn new(config: RciConfig) -> Result<Self> {
        Self::with_probe(config, Arc::new(SystemProbe))
    }

    /// Like [`RciService::new`] with a custom liveness probe for recovery.
    pub fn with_probe(config: RciConfig, probe: Arc<dyn ProcessProbe>) -> Result<Self> {
        let store = JobStore::new(config.async_dir());
        store.ensure_dir()?;

        let service = RciService {
            registry: HookRegistry::new(),
            jobs: AsyncEngine::new(store, probe, config.retention()),
            sync: FileSync::new(config.scan_roots(), config.async_dir()),
            config,
        };
        builtin::install_defaults(&service)?;

        info!(
            name = %service.config.name,
            local_root = %service.config.local_root().display(),
            hooks = service.registry.len(),
            "RCI service initialized"
        );
        Ok(service)
    }

    pub fn config(&self) -> &RciConfig {
        &self.config
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn jobs(&self) -> &AsyncEngine {
        &self.jobs
    }

    pub fn register(&self, path: &str, hook: Hook) -> Result<()> {
        self.registry.register(path, hook)?;
        debug!(hook = %path, "Hook registered");
        Ok(())
    }

    pub fn register_builtin(&self, path: &str, hook: Hook, handler: BuiltinHandler) -> Result<()> {
        self.registry.register_builtin(path, hook, handler)?;
        debug!(hook = %path, "Built-in hook registered");
        Ok(())
    }

    /// Async hooks currently holding the run guard.
    pub fn running(&self) -> BTreeMap<String, ActiveHook> {
        self.jobs.running()
    }

    /// Runs the hook registered at `hook_path` and returns its reply bytes.
    pub fn run(&self, token: &[u8], hook_path: &str, args: &Args) -> Result<Vec<u8>> {
        let Some(hook) = self.registry.lookup(hook_path) else {
            debug!(hook = %hook_path, "Unknown hook requested");
            return Err(RciError::HookNotFound(hook_path.to_string()));
        };

        match &hook.kind {
            HookType::BuiltIn => {
                let handler = self
                    .registry
                    .handler(&hook.hook)
                    .ok_or_else(|| RciError::HandlerMissing(hook.hook.clone()))?;
                handler(self, token, &hook, args)
            }
            HookType::ShellScript if hook.sync => exec::run_sync(&hook),
            HookType::ShellScript => self.jobs.run(&hook, args),
            HookType::Other(kind) => Err(RciError::UnsupportedCommandType {
                hook: hook.hook.clone(),
                kind: kind.clone(),
            }),
        }
    }

    /// One file-sync pass over the scan roots.
    pub fn scan(&self) -> ScanReport {
        self.sync.scan(&self.registry, &self.jobs)
    }

    /// Starts the periodic file-sync loop on a named background thread.
    ///
    /// The first pass runs one interval after the call; run [`RciService::scan`]
    /// beforehand to load file hooks immediately. Does nothing (and returns
    /// `None`) when file hooks are disabled.
    pub fn spawn_file_sync(self: &Arc<Self>) -> io::Result<Option<JoinHandle<()>>> {
        if !self.config.file_hooks {
            info!("File hooks disabled; skipping file sync");
            return Ok(None);
        }

        let service = Arc::clone(self);
        let interval = self.config.scan_interval();
        let handle = thread::Builder::new()
            .name("rci-file-sync".to_string())
            .spawn(move || {
                info!(
                    interval_secs = interval.as_secs(),
                    roots = ?service.sync.roots(),
                    "File sync started"
                );
                loop {
                    thread::sleep(interval);
                    let report = service.scan();
                    if report.errors > 0 {
                        warn!(errors = report.errors, "File sync pass had errors");
                    }
                }
            })?;
        Ok(Some(handle))
    }
}
