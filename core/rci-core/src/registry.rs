//! Concurrency-safe hook registry.
//!
//! One `RwLock` guards the hook map together with the file-to-hook index, the
//! pinned (in-process) definitions and the built-in handler table. Locks are held
//! only around map access; callers do their I/O before or after.
//!
//! Hooks reach the registry two ways:
//!
//! - [`HookRegistry::register`] / [`HookRegistry::register_builtin`]: explicit,
//!   duplicate paths rejected, never removed by the file scanner.
//! - [`HookRegistry::upsert_from_file`]: file sync re-synchronising from disk. No
//!   duplicate check; the last file loaded for a path wins.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::builtin::BuiltinHandler;
use crate::error::{RciError, Result};
use crate::types::{FileStamp, Hook, HookType};

#[derive(Default)]
struct RegistryState {
    hooks: HashMap<String, Hook>,
    /// Definition file → the hook it declared when last loaded, stamp included.
    /// Kept per file so a file that lost its path to another still has a stamp.
    files: HashMap<PathBuf, Hook>,
    /// In-process registrations, restored if a file override goes away.
    pinned: HashMap<String, Hook>,
    handlers: HashMap<String, BuiltinHandler>,
}

impl RegistryState {
    /// Drops `path`, falling back to another file declaring it, then to its
    /// pinned definition.
    fn remove_or_restore(&mut self, path: &str) {
        let fallback = self
            .files
            .iter()
            .filter(|(_, hook)| hook.hook == path && !hook.is_deleted())
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(_, hook)| hook.clone())
            .or_else(|| self.pinned.get(path).cloned());
        match fallback {
            Some(hook) => {
                self.hooks.insert(path.to_string(), hook);
            }
            None => {
                self.hooks.remove(path);
            }
        }
    }

    fn owned_by_file(&self, path: &str, file: &Path) -> bool {
        self.hooks
            .get(path)
            .and_then(|hook| hook.source.as_ref())
            .is_some_and(|stamp| stamp.file_name == file)
    }
}

#[derive(Default)]
pub struct HookRegistry {
    state: RwLock<RegistryState>,
    generation: AtomicU64,
}

/// Strips query string and fragment from a URL-ish hook path.
pub fn normalize_hook_path(raw: &str) -> &str {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    &raw[..end]
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning only means a writer panicked mid-update; the maps stay usable.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a hook under `path`, failing if the path is taken.
    pub fn register(&self, path: &str, mut hook: Hook) -> Result<()> {
        let path = normalize_hook_path(path).to_string();
        hook.hook = path.clone();
        hook.source = None;

        let mut state = self.state_for_insert(&path)?;
        state.pinned.insert(path.clone(), hook.clone());
        state.hooks.insert(path, hook);
        Ok(())
    }

    /// Registers a built-in hook together with its handler.
    pub fn register_builtin(
        &self,
        path: &str,
        mut hook: Hook,
        handler: BuiltinHandler,
    ) -> Result<()> {
        let path = normalize_hook_path(path).to_string();
        hook.hook = path.clone();
        hook.kind = HookType::BuiltIn;
        hook.source = None;

        let mut state = self.state_for_insert(&path)?;
        state.handlers.insert(path.clone(), handler);
        state.pinned.insert(path.clone(), hook.clone());
        state.hooks.insert(path, hook);
        Ok(())
    }

    fn state_for_insert(&self, path: &str) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        let state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.hooks.contains_key(path) {
            return Err(RciError::AlreadyRegistered(path.to_string()));
        }
        self.generation.fetch_add(1, Ordering::Relaxed);
        Ok(state)
    }

    pub fn lookup(&self, path: &str) -> Option<Hook> {
        self.read().hooks.get(path).cloned()
    }

    pub fn handler(&self, path: &str) -> Option<BuiltinHandler> {
        self.read().handlers.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().hooks.is_empty()
    }

    /// Every hook keyed by path, in path order.
    pub fn snapshot(&self) -> BTreeMap<String, Hook> {
        self.read()
            .hooks
            .iter()
            .map(|(path, hook)| (path.clone(), hook.clone()))
            .collect()
    }

    /// Number of write-lock acquisitions so far. Lets callers check that a pass
    /// made no registry writes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    // ─────────────────────────────────────────────────────────────────────
    // File sync support
    // ─────────────────────────────────────────────────────────────────────

    /// The stamp recorded when `file` was last loaded, whether or not its hook
    /// currently owns the path.
    pub fn cached_stamp(&self, file: &Path) -> Option<FileStamp> {
        self.read()
            .files
            .get(file)
            .and_then(|hook| hook.source.clone())
    }

    pub fn tracked_files(&self) -> Vec<PathBuf> {
        self.read().files.keys().cloned().collect()
    }

    /// Inserts or overwrites a hook loaded from disk. `hook.source` must be set.
    pub fn upsert_from_file(&self, hook: Hook) {
        let Some(file) = hook.source.as_ref().map(|stamp| stamp.file_name.clone()) else {
            tracing::warn!(hook = %hook.hook, "Ignoring file upsert without a source stamp");
            return;
        };

        let mut state = self.write();
        if let Some(previous) = state.files.insert(file.clone(), hook.clone()) {
            if previous.hook != hook.hook && state.owned_by_file(&previous.hook, &file) {
                state.remove_or_restore(&previous.hook);
            }
        }
        state.hooks.insert(hook.hook.clone(), hook);
    }

    /// Flags hooks whose backing files are gone. Returns how many were flagged.
    ///
    /// Index entries whose hook has since been taken over by another file or an
    /// in-process registration are dropped instead.
    pub fn mark_deleted(&self, missing: &[PathBuf]) -> usize {
        if missing.is_empty() {
            return 0;
        }

        let mut state = self.write();
        let mut marked = 0;
        for file in missing {
            let Some(path) = state.files.get(file).map(|hook| hook.hook.clone()) else {
                continue;
            };
            if !state.owned_by_file(&path, file) {
                state.files.remove(file);
                continue;
            }
            if let Some(stamp) = state
                .files
                .get_mut(file)
                .and_then(|hook| hook.source.as_mut())
            {
                stamp.deleted = true;
            }
            if let Some(stamp) = state
                .hooks
                .get_mut(&path)
                .and_then(|hook| hook.source.as_mut())
            {
                if !stamp.deleted {
                    stamp.deleted = true;
                    marked += 1;
                }
            }
        }
        marked
    }

    pub fn has_deleted(&self) -> bool {
        self.read().hooks.values().any(Hook::is_deleted)
    }

    /// Removes every hook flagged deleted, along with its index entry.
    pub fn purge_deleted(&self) -> usize {
        if !self.has_deleted() {
            return 0;
        }

        let mut state = self.write();
        let doomed: Vec<(String, PathBuf)> = state
            .hooks
            .iter()
            .filter_map(|(path, hook)| match &hook.source {
                Some(stamp) if stamp.deleted => Some((path.clone(), stamp.file_name.clone())),
                _ => None,
            })
            .collect();

        for (path, file) in &doomed {
            state.files.remove(file);
            state.remove_or_restore(path);
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use std::time::SystemTime;

    fn file_hook(path: &str, file: &str, size: u64) -> Hook {
        let mut hook = Hook::shell(path, "from file", true, &["echo file"]);
        hook.source = Some(FileStamp {
            file_name: PathBuf::from(file),
            size,
            mod_time: SystemTime::UNIX_EPOCH,
            deleted: false,
        });
        hook
    }

    #[test]
    fn duplicate_register_keeps_first_definition() {
        let registry = HookRegistry::new();
        registry
            .register("/rci/a", Hook::shell("/rci/a", "first", true, &["echo 1"]))
            .unwrap();

        let err = registry
            .register("/rci/a", Hook::shell("/rci/a", "second", true, &["echo 2"]))
            .unwrap_err();

        assert!(matches!(err, RciError::AlreadyRegistered(ref p) if p == "/rci/a"));
        assert_eq!(registry.lookup("/rci/a").unwrap().name, "first");
    }

    #[test]
    fn register_strips_query_and_fragment() {
        let registry = HookRegistry::new();
        registry
            .register("/rci/a?verbose=1#top", Hook::shell("", "a", true, &["true"]))
            .unwrap();

        let hook = registry.lookup("/rci/a").unwrap();
        assert_eq!(hook.hook, "/rci/a");
    }

    #[test]
    fn register_builtin_stores_handler() {
        let registry = HookRegistry::new();
        let handler = builtin::handler(|_, _, _, _| Ok(b"{}".to_vec()));
        registry
            .register_builtin("/rci/x", Hook::built_in("/rci/x", "x"), handler)
            .unwrap();

        assert!(registry.handler("/rci/x").is_some());
        assert_eq!(registry.lookup("/rci/x").unwrap().kind, HookType::BuiltIn);
    }

    #[test]
    fn upsert_overwrites_without_duplicate_check() {
        let registry = HookRegistry::new();
        registry.upsert_from_file(file_hook("/rci/f", "/hooks/f.json", 10));
        registry.upsert_from_file(file_hook("/rci/f", "/hooks/f.json", 20));

        let stamp = registry.cached_stamp(Path::new("/hooks/f.json")).unwrap();
        assert_eq!(stamp.size, 20);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn renamed_hook_path_drops_previous_hook() {
        let registry = HookRegistry::new();
        registry.upsert_from_file(file_hook("/rci/old", "/hooks/f.json", 10));
        registry.upsert_from_file(file_hook("/rci/new", "/hooks/f.json", 11));

        assert!(registry.lookup("/rci/old").is_none());
        assert!(registry.lookup("/rci/new").is_some());
    }

    #[test]
    fn mark_then_purge_removes_file_hooks() {
        let registry = HookRegistry::new();
        registry.upsert_from_file(file_hook("/rci/f", "/hooks/f.json", 10));

        let marked = registry.mark_deleted(&[PathBuf::from("/hooks/f.json")]);
        assert_eq!(marked, 1);
        assert!(registry.lookup("/rci/f").unwrap().is_deleted());

        assert_eq!(registry.purge_deleted(), 1);
        assert!(registry.lookup("/rci/f").is_none());
        assert!(registry.tracked_files().is_empty());
    }

    #[test]
    fn purge_restores_pinned_definition() {
        let registry = HookRegistry::new();
        registry
            .register("/rci/f", Hook::shell("/rci/f", "pinned", true, &["echo pinned"]))
            .unwrap();
        registry.upsert_from_file(file_hook("/rci/f", "/hooks/f.json", 10));
        assert_eq!(registry.lookup("/rci/f").unwrap().name, "from file");

        registry.mark_deleted(&[PathBuf::from("/hooks/f.json")]);
        registry.purge_deleted();

        let hook = registry.lookup("/rci/f").unwrap();
        assert_eq!(hook.name, "pinned");
        assert!(hook.source.is_none());
    }

    #[test]
    fn each_file_keeps_its_own_stamp_when_paths_collide() {
        let registry = HookRegistry::new();
        registry.upsert_from_file(file_hook("/rci/x", "/hooks/a.json", 10));
        registry.upsert_from_file(file_hook("/rci/x", "/hooks/b.json", 20));

        let a = registry.cached_stamp(Path::new("/hooks/a.json")).unwrap();
        let b = registry.cached_stamp(Path::new("/hooks/b.json")).unwrap();
        assert!(a.matches(10, SystemTime::UNIX_EPOCH));
        assert!(b.matches(20, SystemTime::UNIX_EPOCH));

        let owner = registry.lookup("/rci/x").unwrap().source.unwrap();
        assert_eq!(owner.file_name, PathBuf::from("/hooks/b.json"));
    }

    #[test]
    fn purging_the_owner_falls_back_to_a_colliding_file() {
        let registry = HookRegistry::new();
        registry.upsert_from_file(file_hook("/rci/x", "/hooks/a.json", 10));
        registry.upsert_from_file(file_hook("/rci/x", "/hooks/b.json", 20));

        assert_eq!(registry.mark_deleted(&[PathBuf::from("/hooks/b.json")]), 1);
        assert_eq!(registry.purge_deleted(), 1);

        let hook = registry.lookup("/rci/x").unwrap();
        assert_eq!(hook.source.unwrap().file_name, PathBuf::from("/hooks/a.json"));
        assert_eq!(registry.tracked_files(), vec![PathBuf::from("/hooks/a.json")]);
    }

    #[test]
    fn vanished_losing_file_is_just_untracked() {
        let registry = HookRegistry::new();
        registry.upsert_from_file(file_hook("/rci/x", "/hooks/a.json", 10));
        registry.upsert_from_file(file_hook("/rci/x", "/hooks/b.json", 20));

        assert_eq!(registry.mark_deleted(&[PathBuf::from("/hooks/a.json")]), 0);
        assert!(!registry.has_deleted());
        assert_eq!(registry.tracked_files(), vec![PathBuf::from("/hooks/b.json")]);
    }

    #[test]
    fn read_only_calls_do_not_bump_generation() {
        let registry = HookRegistry::new();
        registry.upsert_from_file(file_hook("/rci/f", "/hooks/f.json", 10));
        let before = registry.generation();

        registry.lookup("/rci/f");
        registry.snapshot();
        registry.mark_deleted(&[]);
        registry.purge_deleted();

        assert_eq!(registry.generation(), before);
    }
}
