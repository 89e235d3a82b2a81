//! Watcher (C4, half of C4/C5 "Watcher & Listener"): wraps `notify` and tracks, per monitored
//! source, whether it is currently watched directly or via its containing directory (awaiting
//! recreation after deletion/rotation).

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to start filesystem watcher: {0}")]
    Init(#[source] notify::Error),
    #[error("failed to watch {path}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Watching the file itself.
    File,
    /// Watching the containing directory, waiting for a file with the matching basename to
    /// reappear.
    Directory,
}

struct Entry {
    mode: WatchMode,
    watched_path: PathBuf,
    basename: String,
}

/// One batch of raw filesystem events, already filtered to classes the Listener cares about.
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: EventKind,
}

pub struct Watcher {
    inner: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    entries: HashMap<PathBuf, Entry>,
}

impl Watcher {
    pub fn new() -> Result<Self, WatcherError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let inner = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(WatcherError::Init)?;
        Ok(Self {
            inner,
            rx,
            entries: HashMap::new(),
        })
    }

    /// Subscribes directly to `source_path` (content-modified / metadata-changed / moved-from /
    /// deleted classes, per the platform backend's default event set).
    pub fn watch_file(&mut self, source_path: &Path) -> Result<(), WatcherError> {
        self.inner
            .watch(source_path, RecursiveMode::NonRecursive)
            .map_err(|source| WatcherError::Subscribe {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.entries.insert(
            source_path.to_path_buf(),
            Entry {
                mode: WatchMode::File,
                watched_path: source_path.to_path_buf(),
                basename: basename_of(source_path),
            },
        );
        Ok(())
    }

    /// Subscribes to `source_path`'s containing directory instead, awaiting recreation of a file
    /// with the same basename.
    pub fn watch_directory(&mut self, source_path: &Path) -> Result<(), WatcherError> {
        let dir = source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        self.inner
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatcherError::Subscribe {
                path: dir.clone(),
                source,
            })?;
        self.entries.insert(
            source_path.to_path_buf(),
            Entry {
                mode: WatchMode::Directory,
                watched_path: dir,
                basename: basename_of(source_path),
            },
        );
        Ok(())
    }

    /// Drops the subscription for `source_path`. If another source shares the same watched path
    /// (two rules in the same directory, both awaiting recreation), the underlying `notify`
    /// subscription is left in place.
    pub fn unwatch(&mut self, source_path: &Path) {
        let Some(entry) = self.entries.remove(source_path) else {
            return;
        };
        let still_needed = self.entries.values().any(|e| e.watched_path == entry.watched_path);
        if !still_needed {
            let _ = self.inner.unwatch(&entry.watched_path);
        }
    }

    pub fn mode_of(&self, source_path: &Path) -> Option<WatchMode> {
        self.entries.get(source_path).map(|e| e.mode)
    }

    /// Blocks up to `timeout` for the next batch of raw notify events, translating each into a
    /// `(source_path, RawEvent)` pair by matching against the registered entries. A directory-watch
    /// event whose path doesn't match any registered basename is dropped (someone else's file in
    /// the same directory).
    pub fn recv(&self, timeout: Duration) -> Vec<(PathBuf, RawEvent)> {
        let mut out = Vec::new();
        let first = match self.rx.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => return out,
            Err(RecvTimeoutError::Disconnected) => return out,
        };
        self.push_translated(first, &mut out);
        while let Ok(res) = self.rx.try_recv() {
            self.push_translated(res, &mut out);
        }
        out
    }

    fn push_translated(&self, res: notify::Result<Event>, out: &mut Vec<(PathBuf, RawEvent)>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "filesystem watcher reported an error");
                return;
            }
        };
        if matches!(event.kind, EventKind::Other) {
            return;
        }
        for path in &event.paths {
            if let Some(source_path) = self.owner_of(path) {
                out.push((
                    source_path,
                    RawEvent {
                        path: path.clone(),
                        kind: event.kind.clone(),
                    },
                ));
            }
        }
    }

    fn owner_of(&self, event_path: &Path) -> Option<PathBuf> {
        for (source_path, entry) in &self.entries {
            match entry.mode {
                WatchMode::File if event_path == entry.watched_path => {
                    return Some(source_path.clone())
                }
                WatchMode::Directory => {
                    if event_path.parent() == Some(entry.watched_path.as_path())
                        && basename_of(event_path) == entry.basename
                    {
                        return Some(source_path.clone());
                    }
                }
                _ => {}
            }
        }
        None
    }
}

fn basename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
