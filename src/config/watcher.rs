//! File watcher feeding the reload pipeline.
//!
//! Watches the parent directory rather than the file itself: editors that
//! save by rename replace the inode, which a direct file watch would lose.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::reload::{ChangeCallback, ChangeSource, WatchError};

/// Emits a raw change signal whenever the watched file is created, modified
/// or removed. Bursts are expected; wrap in a debouncer.
pub struct FileChangeSource {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl FileChangeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watcher: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn watch_target(&self) -> (PathBuf, Option<OsString>) {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        (dir, self.path.file_name().map(|n| n.to_os_string()))
    }
}

fn is_relevant(event: &Event, file_name: Option<&OsString>) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    if !kind_matches {
        return false;
    }
    match file_name {
        Some(name) => event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(name.as_os_str())),
        None => true,
    }
}

impl ChangeSource for FileChangeSource {
    fn start(&mut self, on_change: ChangeCallback) -> Result<(), WatchError> {
        if self.watcher.is_some() {
            return Err(WatchError::AlreadyStarted);
        }

        let (dir, file_name) = self.watch_target();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_relevant(&event, file_name.as_ref()) {
                        tracing::debug!(kind = ?event.kind, "Store file change detected");
                        on_change();
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| WatchError::Watch(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Watch(e.to_string()))?;

        tracing::info!(path = ?self.path, "Store watcher started");
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        if self.watcher.take().is_some() {
            tracing::info!(path = ?self.path, "Store watcher stopped");
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
