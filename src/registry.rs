//! Indexed collection of Log Sources, keyed by canonical path and by raw descriptor.

use crate::source::LogSource;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Two parallel indices over the same set of sources. `by_fd` is rebuilt whenever a source's
/// open/close state changes, so the two indices can never disagree for longer than the call that
/// performed the transition.
#[derive(Default)]
pub struct SourceRegistry {
    by_path: HashMap<PathBuf, Arc<Mutex<LogSource>>>,
    by_fd: HashMap<RawFd, PathBuf>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: LogSource) -> Arc<Mutex<LogSource>> {
        let path = source.path.clone();
        let handle = Arc::new(Mutex::new(source));
        self.by_path.insert(path, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Mutex<LogSource>>> {
        self.by_path.get(path).cloned()
    }

    /// Removes a source from both indices. Callers must close the source first.
    pub fn remove(&mut self, path: &Path) {
        if let Some(handle) = self.by_path.remove(path) {
            let fd = handle.lock().unwrap().raw_fd();
            if let Some(fd) = fd {
                self.by_fd.remove(&fd);
            }
        }
    }

    /// Re-keys the descriptor index for `path` to match its current open/closed state. Call
    /// after any `open`/`close`/`reopen` on the underlying source.
    pub fn refresh_fd_index(&mut self, path: &Path) {
        self.by_fd.retain(|_, p| p != path);
        if let Some(handle) = self.by_path.get(path) {
            if let Some(fd) = handle.lock().unwrap().raw_fd() {
                self.by_fd.insert(fd, path.to_path_buf());
            }
        }
    }

    pub fn get_by_fd(&self, fd: RawFd) -> Option<Arc<Mutex<LogSource>>> {
        self.by_fd.get(&fd).and_then(|p| self.by_path.get(p)).cloned()
    }

    /// A lock-free snapshot of currently registered paths, taken under the registry's own
    /// ownership (no per-source lock held while the caller iterates).
    pub fn paths(&self) -> Vec<PathBuf> {
        self.by_path.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// True iff every fd-indexed path still exists in the path index and vice versa for any
    /// currently-open source. Used by tests to check the C4 invariant.
    pub fn indices_agree(&self) -> bool {
        for (path, handle) in &self.by_path {
            let fd = handle.lock().unwrap().raw_fd();
            match fd {
                Some(fd) => {
                    if self.by_fd.get(&fd) != Some(path) {
                        return false;
                    }
                }
                None => {
                    if self.by_fd.values().any(|p| p == path) {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.by_path.clear();
        self.by_fd.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;

    #[test]
    fn indices_agree_across_open_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"").unwrap();

        let mut registry = SourceRegistry::new();
        let source = LogSource::new(path.clone(), SourceKind::Regular, b"\n".to_vec());
        registry.insert(source);
        assert!(registry.indices_agree());

        {
            let handle = registry.get(&path).unwrap();
            handle.lock().unwrap().open(false).unwrap();
        }
        registry.refresh_fd_index(&path);
        assert!(registry.indices_agree());
        assert!(registry.get_by_fd(registry.get(&path).unwrap().lock().unwrap().raw_fd().unwrap()).is_some());

        {
            let handle = registry.get(&path).unwrap();
            handle.lock().unwrap().close();
        }
        registry.refresh_fd_index(&path);
        assert!(registry.indices_agree());
    }

    #[test]
    fn remove_drops_from_both_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"").unwrap();
        let mut registry = SourceRegistry::new();
        registry.insert(LogSource::new(path.clone(), SourceKind::Regular, b"\n".to_vec()));
        registry.remove(&path);
        assert!(registry.is_empty());
        assert!(registry.get(&path).is_none());
    }
}
