//! Listener (C5): multiplexes the Watcher's event stream into a ready-set of Log Source paths.

use crate::registry::SourceRegistry;
use crate::watcher::{WatchMode, Watcher};
use notify::event::{EventKind, ModifyKind, RemoveKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn is_removal_like(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(RemoveKind::File | RemoveKind::Any)
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Metadata(_))
    )
}

pub struct Listener<'a> {
    watcher: &'a mut Watcher,
}

impl<'a> Listener<'a> {
    pub fn new(watcher: &'a mut Watcher) -> Self {
        Self { watcher }
    }

    /// Blocks up to `timeout`, processes every pending event against `registry`, and returns the
    /// set of source paths that are open and may have new content.
    pub fn wait(&mut self, registry: &mut SourceRegistry, timeout: Duration) -> Vec<PathBuf> {
        let events = self.watcher.recv(timeout);
        let mut ready: HashSet<PathBuf> = HashSet::new();

        for (source_path, raw) in events {
            let Some(handle) = registry.get(&source_path) else {
                continue;
            };

            if is_removal_like(&raw.kind) {
                let exists = source_path.exists();
                let mut source = handle.lock().unwrap();
                if !exists {
                    tracing::info!(path = %source_path.display(), "monitored path removed; watching parent directory");
                    source.close();
                    self.watcher.unwatch(&source_path);
                    if let Err(err) = self.watcher.watch_directory(&source_path) {
                        tracing::warn!(path = %source_path.display(), error = %err, "failed to watch parent directory after removal");
                    }
                } else {
                    tracing::info!(path = %source_path.display(), "monitored path replaced; reopening");
                    let _ = source.reopen(true);
                    self.watcher.unwatch(&source_path);
                    if let Err(err) = self.watcher.watch_file(&source_path) {
                        tracing::warn!(path = %source_path.display(), error = %err, "failed to re-subscribe after reopen");
                    }
                    drop(source);
                    registry.refresh_fd_index(&source_path);
                    ready.insert(source_path.clone());
                }
                continue;
            }

            if self.watcher.mode_of(&source_path) == Some(WatchMode::Directory)
                && path_basename_matches(&raw.path, &source_path)
            {
                tracing::info!(path = %source_path.display(), "monitored path recreated; resuming from start");
                let mut source = handle.lock().unwrap();
                let _ = source.reopen(false);
                drop(source);
                self.watcher.unwatch(&source_path);
                if let Err(err) = self.watcher.watch_file(&source_path) {
                    tracing::warn!(path = %source_path.display(), error = %err, "failed to watch recreated file");
                }
                registry.refresh_fd_index(&source_path);
                ready.insert(source_path.clone());
                continue;
            }

            {
                let source = handle.lock().unwrap();
                if source.is_open() {
                    ready.insert(source_path.clone());
                }
            }
        }

        ready.into_iter().collect()
    }
}

fn path_basename_matches(event_path: &Path, source_path: &Path) -> bool {
    event_path.file_name() == source_path.file_name()
}
