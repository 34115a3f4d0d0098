//! File watching contract
//!
//! Builders that watch files ask their context for a
//! [`BuilderWatcherFactory`]. When one is present, the builder must use it
//! instead of a real OS watcher.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Kind of file change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    /// File appeared
    Created,
    /// File content changed
    Modified,
    /// File removed
    Deleted,
}

/// A single file change
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Absolute path of the changed file
    pub path: PathBuf,
    /// Change kind
    #[serde(rename = "type")]
    pub kind: WatchEventKind,
}

impl WatchEvent {
    /// Create event
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Modified event
    #[inline]
    #[must_use]
    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, WatchEventKind::Modified)
    }

    /// Deleted event
    #[inline]
    #[must_use]
    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path, WatchEventKind::Deleted)
    }
}

/// Callback receiving a whole batch of events
pub type WatchCallback = Arc<dyn Fn(&[WatchEvent]) + Send + Sync>;

/// Source of watchers handed to builders
pub trait BuilderWatcherFactory: Send + Sync {
    /// Register interest in files and directories
    ///
    /// The registration stays active until [`WatcherHandle::close`] is called.
    fn watch(
        &self,
        files: Vec<PathBuf>,
        directories: Vec<PathBuf>,
        callback: WatchCallback,
    ) -> WatcherHandle;
}

/// Disposer returned by [`BuilderWatcherFactory::watch`]
#[must_use = "the watcher stays registered until closed"]
pub struct WatcherHandle {
    close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WatcherHandle {
    /// Create handle from a close action
    #[inline]
    pub fn new(close: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            close: Some(Box::new(close)),
        }
    }

    /// Unregister the watcher
    pub fn close(mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

impl fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("open", &self.close.is_some())
            .finish()
    }
}
