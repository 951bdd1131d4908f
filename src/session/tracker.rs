//! Paths created on behalf of a session

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Set of paths that must not outlive the session.
///
/// Workspaces remove themselves on normal teardown and untrack their paths.
/// Whatever is still listed when the session ends (interrupted submission,
/// failed removal) is deleted by [`FileTracker::cleanup`]. Clones share the
/// same set, so a signal handler can hold its own handle.
#[derive(Debug, Clone, Default)]
pub struct FileTracker {
    paths: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_all<'a, I>(&self, paths: I)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut tracked = self.lock();
        tracked.extend(paths.into_iter().cloned());
    }

    pub fn untrack_all<'a, I>(&self, paths: I)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut tracked = self.lock();
        for path in paths {
            tracked.remove(path);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every tracked path that still exists.
    ///
    /// Missing paths are skipped. Paths that could not be removed stay
    /// tracked and are returned, so a later call can retry them.
    pub fn cleanup(&self) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = std::mem::take(&mut *self.lock()).into_iter().collect();
        let mut failed = Vec::new();

        // Reverse order visits children before their directory
        for path in paths.into_iter().rev() {
            let result = match std::fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&path),
                Ok(_) => std::fs::remove_file(&path),
                Err(_) => continue,
            };

            match result {
                Ok(()) => tracing::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to remove {}: {}", path.display(), e);
                    failed.push(path);
                }
            }
        }

        self.lock().extend(failed.iter().cloned());
        failed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<PathBuf>> {
        // A poisoned set is still a valid set of paths
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}
