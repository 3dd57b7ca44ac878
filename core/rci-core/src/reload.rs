//! File-driven hot reload of hook definitions.
//!
//! Each scan walks the global root, then the local root:
//!
//! 1. Regular files whose `(size, mtime)` differ from the cached stamp are parsed
//!    as hook definitions and upserted; unchanged files are skipped.
//! 2. Files under the async directory are job artifacts, not definitions, and go
//!    to recovery instead.
//! 3. Hooks flagged deleted by the previous scan are purged. A file that came
//!    back in the meantime was reloaded in step 1 and is no longer flagged.
//! 4. Tracked definition files that no longer exist get their hooks flagged.
//!
//! So a deleted file's hook disappears on the second scan after the deletion.
//! Per-file problems are logged and counted; they never stop the scan.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs_err as fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{RciError, Result};
use crate::jobs::AsyncEngine;
use crate::registry::HookRegistry;
use crate::types::{FileStamp, Hook};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Definition files (re)loaded into the registry.
    pub updated: usize,
    /// Hooks flagged because their file vanished.
    pub marked: usize,
    /// Hooks removed after being flagged by the previous scan.
    pub purged: usize,
    pub jobs_reconciled: usize,
    pub artifacts_removed: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct FileSync {
    roots: Vec<PathBuf>,
    async_dir: PathBuf,
}

impl FileSync {
    pub fn new(roots: Vec<PathBuf>, async_dir: PathBuf) -> Self {
        FileSync { roots, async_dir }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn scan(&self, registry: &HookRegistry, jobs: &AsyncEngine) -> ScanReport {
        let mut report = ScanReport::default();

        for root in &self.roots {
            self.walk(root, registry, jobs, &mut report);
        }

        report.purged = registry.purge_deleted();

        let missing: Vec<PathBuf> = registry
            .tracked_files()
            .into_iter()
            .filter(|file| !file.is_file())
            .collect();
        report.marked = registry.mark_deleted(&missing);

        if report.updated > 0 || report.marked > 0 || report.purged > 0 {
            info!(
                updated = report.updated,
                marked = report.marked,
                purged = report.purged,
                "Hook definitions synced"
            );
        }
        if report.jobs_reconciled > 0 || report.artifacts_removed > 0 {
            info!(
                reconciled = report.jobs_reconciled,
                removed = report.artifacts_removed,
                "Async job artifacts checked"
            );
        }
        report
    }

    fn walk(
        &self,
        root: &Path,
        registry: &HookRegistry,
        jobs: &AsyncEngine,
        report: &mut ScanReport,
    ) {
        if !root.exists() {
            debug!(root = %root.display(), "Scan root does not exist");
            return;
        }

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(root = %root.display(), error = %err, "Failed to walk hook directory");
                    report.errors += 1;
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let (size, modified) = match file_stat(path) {
                Ok(Some(stat)) => stat,
                Ok(None) => continue,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to stat file");
                    report.errors += 1;
                    continue;
                }
            };

            if path.starts_with(&self.async_dir) {
                let outcome = jobs.check_artifact(path, modified);
                report.jobs_reconciled += usize::from(outcome.reconciled);
                report.artifacts_removed += usize::from(outcome.removed);
                report.errors += usize::from(outcome.failed);
                continue;
            }

            match sync_definition(registry, path, size, modified) {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping hook definition");
                    report.errors += 1;
                }
            }
        }
    }
}

/// Size and mtime of a regular file (following symlinks); `None` for anything else.
fn file_stat(path: &Path) -> Result<Option<(u64, SystemTime)>> {
    let metadata = fs::metadata(path).map_err(|err| RciError::fs("stat", err))?;
    if !metadata.is_file() {
        return Ok(None);
    }
    let modified = metadata
        .modified()
        .map_err(|err| RciError::fs(format!("mtime of {}", path.display()), err))?;
    Ok(Some((metadata.len(), modified)))
}

/// Returns `true` when the registry was written.
fn sync_definition(
    registry: &HookRegistry,
    path: &Path,
    size: u64,
    modified: SystemTime,
) -> Result<bool> {
    if registry
        .cached_stamp(path)
        .is_some_and(|stamp| stamp.matches(size, modified))
    {
        return Ok(false);
    }

    let hook = load_definition(path, size, modified)?;
    debug!(hook = %hook.hook, path = %path.display(), size, "Loaded hook definition");
    registry.upsert_from_file(hook);
    Ok(true)
}

pub fn load_definition(path: &Path, size: u64, modified: SystemTime) -> Result<Hook> {
    let data = fs::read(path).map_err(|err| RciError::fs("read hook definition", err))?;
    let mut hook: Hook =
        serde_json::from_slice(&data).map_err(|err| RciError::DefinitionParseFailed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;

    if hook.hook.trim().is_empty() {
        return Err(RciError::DefinitionParseFailed {
            path: path.to_path_buf(),
            details: "missing hook path".to_string(),
        });
    }

    hook.source = Some(FileStamp {
        file_name: path.to_path_buf(),
        size,
        mod_time: modified,
        deleted: false,
    });
    Ok(hook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStore;
    use crate::liveness::SystemProbe;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        sync: FileSync,
        registry: HookRegistry,
        jobs: AsyncEngine,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("hooks");
        let async_dir = root.join("async");
        std::fs::create_dir_all(&async_dir).unwrap();
        Fixture {
            sync: FileSync::new(vec![root.clone()], async_dir.clone()),
            registry: HookRegistry::new(),
            jobs: AsyncEngine::new(
                JobStore::new(async_dir),
                Arc::new(SystemProbe),
                Duration::from_secs(36_000),
            ),
            root,
            _dir: dir,
        }
    }

    fn definition(path: &str, command: &str) -> String {
        format!(
            r#"{{"hook": "{path}", "name": "test", "type": "shell-script-command", "sync": true, "data": {{"execute": ["{command}"]}}}}"#
        )
    }

    #[test]
    fn malformed_file_does_not_stop_the_scan() {
        let f = fixture();
        std::fs::write(f.root.join("a-broken.json"), "{ nope").unwrap();
        std::fs::write(f.root.join("b-good.json"), definition("/rci/good", "true")).unwrap();

        let report = f.sync.scan(&f.registry, &f.jobs);

        assert_eq!(report.updated, 1);
        assert_eq!(report.errors, 1);
        assert!(f.registry.lookup("/rci/good").is_some());
    }

    #[test]
    fn definition_without_path_is_rejected() {
        let f = fixture();
        let file = f.root.join("x.json");
        std::fs::write(&file, r#"{"hook": "", "type": "shell-script-command"}"#).unwrap();
        let meta = std::fs::metadata(&file).unwrap();

        let err = load_definition(&file, meta.len(), meta.modified().unwrap()).unwrap_err();
        assert!(matches!(err, RciError::DefinitionParseFailed { .. }));
    }

    #[test]
    fn async_artifacts_are_not_parsed_as_hooks() {
        let f = fixture();
        std::fs::write(
            f.root.join("async").join("JOB.json"),
            r#"{"uid":"JOB","hook":"/rci/x","command":"true","pid":1,"finished":true,"error":""}"#,
        )
        .unwrap();

        let report = f.sync.scan(&f.registry, &f.jobs);

        assert_eq!(report.updated, 0);
        assert_eq!(report.errors, 0);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn reappearing_file_clears_the_mark() {
        let f = fixture();
        let file = f.root.join("hook.json");
        let body = definition("/rci/flaky", "true");
        std::fs::write(&file, &body).unwrap();
        f.sync.scan(&f.registry, &f.jobs);

        std::fs::remove_file(&file).unwrap();
        assert_eq!(f.sync.scan(&f.registry, &f.jobs).marked, 1);

        std::fs::write(&file, &body).unwrap();
        let report = f.sync.scan(&f.registry, &f.jobs);
        assert_eq!(report.purged, 0);
        assert_eq!(report.updated, 1);

        f.sync.scan(&f.registry, &f.jobs);
        let hook = f.registry.lookup("/rci/flaky").unwrap();
        assert!(!hook.is_deleted());
    }

    #[test]
    fn missing_root_is_skipped() {
        let f = fixture();
        let sync = FileSync::new(vec![f.root.join("nowhere")], f.root.join("async"));
        let report = sync.scan(&f.registry, &f.jobs);
        assert_eq!(report, ScanReport::default());
    }
}
