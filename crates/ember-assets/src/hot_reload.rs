//! File watching for refreshing assets during development.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, channel};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::path::AssetPath;

/// Watches directories and reports changed files as asset paths relative to
/// the asset root.
pub struct AssetWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
    root: PathBuf,
    watched_dirs: Vec<PathBuf>,
}

impl AssetWatcher {
    /// Create a watcher that maps changes relative to `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, notify::Error> {
        let (sender, receiver) = channel();
        let watcher = notify::recommended_watcher(move |res| {
            let _ = sender.send(res);
        })?;

        Ok(Self {
            watcher,
            receiver,
            root: canonical(root.as_ref()),
            watched_dirs: Vec::new(),
        })
    }

    /// Canonical asset root changes are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watch a directory recursively. Watching the same directory twice is a
    /// no-op.
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<(), notify::Error> {
        let path = canonical(path.as_ref());
        if !self.watched_dirs.contains(&path) {
            self.watcher.watch(&path, RecursiveMode::Recursive)?;
            tracing::debug!("Watching directory for changes: {}", path.display());
            self.watched_dirs.push(path);
        }
        Ok(())
    }

    /// Directories being watched, canonicalized.
    pub fn watched_directories(&self) -> &[PathBuf] {
        &self.watched_dirs
    }

    /// Map a file system path to an asset path under the root.
    pub fn relative_path(&self, path: &Path) -> Option<AssetPath> {
        let relative = path
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .or_else(|_| canonical(path).strip_prefix(&self.root).map(Path::to_path_buf))
            .ok()?;
        Some(AssetPath::new(relative))
    }

    /// Drain pending events. Returns each changed asset path once, sorted.
    pub fn poll_changes(&mut self) -> Vec<AssetPath> {
        let mut changed = Vec::new();

        while let Ok(event) = self.receiver.try_recv() {
            match event {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        match self.relative_path(path) {
                            Some(asset_path) => {
                                tracing::debug!("File changed: {}", asset_path);
                                changed.push(asset_path);
                            }
                            None => tracing::trace!(
                                "Ignoring change outside the asset root: {}",
                                path.display()
                            ),
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("File watcher error: {}", e);
                }
            }
        }

        changed.sort();
        changed.dedup();
        changed
    }
}

impl std::fmt::Debug for AssetWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetWatcher")
            .field("root", &self.root)
            .field("watched_dirs", &self.watched_dirs)
            .finish()
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_watch_same_directory_twice() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = AssetWatcher::new(temp_dir.path()).unwrap();

        watcher.watch_directory(temp_dir.path()).unwrap();
        watcher.watch_directory(temp_dir.path()).unwrap();
        assert_eq!(watcher.watched_directories().len(), 1);
    }

    #[test]
    fn test_relative_path_under_root() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = AssetWatcher::new(temp_dir.path()).unwrap();

        let inside = watcher.root().join("models").join("cube.mesh");
        assert_eq!(
            watcher.relative_path(&inside),
            Some(AssetPath::new("models/cube.mesh"))
        );
        assert_eq!(watcher.relative_path(Path::new("/definitely/elsewhere.mesh")), None);
    }

    #[test]
    fn test_poll_changes_no_events() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = AssetWatcher::new(temp_dir.path()).unwrap();
        assert!(watcher.poll_changes().is_empty());
    }

    #[test]
    fn test_poll_changes_deduplicates() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = AssetWatcher::new(temp_dir.path()).unwrap();
        watcher.watch_directory(temp_dir.path()).unwrap();

        let file_path = temp_dir.path().join("notes.txt");
        fs::write(&file_path, "initial").unwrap();
        thread::sleep(Duration::from_millis(100));
        let _ = watcher.poll_changes();

        fs::write(&file_path, "modified 1").unwrap();
        fs::write(&file_path, "modified 2").unwrap();
        thread::sleep(Duration::from_millis(200));

        let changes = watcher.poll_changes();
        assert!(changes.len() <= 1, "Expected at most 1 change, got {}", changes.len());
        if let Some(change) = changes.first() {
            assert_eq!(change.as_str(), "notes.txt");
        }
    }
}
