//! Synthetic file watching
//!
//! [`WatcherNotifier`] stands in for an OS file watcher. Builders register
//! through the [`BuilderWatcherFactory`] interface; the harness pushes change
//! batches with [`WatcherNotifier::notify`] after each file operation.
//!
//! Delivery is synchronous and follows registration order. Which descriptors
//! receive a batch is decided by a [`NotifyPolicy`].

use architect_core::{BuilderWatcherFactory, WatchCallback, WatchEvent, WatcherHandle};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// One registered watch
pub struct WatchDescriptor {
    /// Watched files
    pub files: Vec<PathBuf>,
    /// Watched directories
    pub directories: Vec<PathBuf>,
    callback: WatchCallback,
}

impl WatchDescriptor {
    /// Check if any event touches a watched file or directory
    #[must_use]
    pub fn matches(&self, events: &[WatchEvent]) -> bool {
        events.iter().any(|event| {
            self.files.iter().any(|file| *file == event.path)
                || self.directories.iter().any(|dir| event.path.starts_with(dir))
        })
    }
}

impl fmt::Debug for WatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchDescriptor")
            .field("files", &self.files)
            .field("directories", &self.directories)
            .finish_non_exhaustive()
    }
}

/// Decides which descriptors receive a batch
pub trait NotifyPolicy: Send + Sync + fmt::Debug {
    /// Check if `descriptor` should receive `events`
    fn should_notify(&self, descriptor: &WatchDescriptor, events: &[WatchEvent]) -> bool;
}

/// Every registration receives every batch
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyAll;

impl NotifyPolicy for NotifyAll {
    fn should_notify(&self, _descriptor: &WatchDescriptor, _events: &[WatchEvent]) -> bool {
        true
    }
}

/// Registrations receive batches touching their files or directories
#[derive(Debug, Clone, Copy, Default)]
pub struct PathScoped;

impl NotifyPolicy for PathScoped {
    fn should_notify(&self, descriptor: &WatchDescriptor, events: &[WatchEvent]) -> bool {
        descriptor.matches(events)
    }
}

type Registry = Mutex<IndexMap<u64, Arc<WatchDescriptor>>>;

/// In-process watch registry
pub struct WatcherNotifier {
    descriptors: Arc<Registry>,
    next_id: AtomicU64,
    policy: Arc<dyn NotifyPolicy>,
}

impl WatcherNotifier {
    /// Create notifier using [`NotifyAll`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(Arc::new(NotifyAll))
    }

    /// Create notifier with a delivery policy
    #[must_use]
    pub fn with_policy(policy: Arc<dyn NotifyPolicy>) -> Self {
        Self {
            descriptors: Arc::new(Mutex::new(IndexMap::new())),
            next_id: AtomicU64::new(0),
            policy,
        }
    }

    /// Number of active registrations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.lock().len()
    }

    /// Check if nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.lock().is_empty()
    }

    /// Deliver a batch to every matching registration
    ///
    /// Returns the number of callbacks invoked. Callbacks run before this
    /// returns, in registration order. A registration closed by an earlier
    /// callback of the same batch is skipped.
    pub fn notify(&self, events: &[WatchEvent]) -> usize {
        let targets: Vec<(u64, Arc<WatchDescriptor>)> = self
            .descriptors
            .lock()
            .iter()
            .filter(|(_, descriptor)| self.policy.should_notify(descriptor, events))
            .map(|(id, descriptor)| (*id, Arc::clone(descriptor)))
            .collect();

        tracing::trace!(events = events.len(), watchers = targets.len(), "notifying watchers");
        let mut delivered = 0;
        for (id, descriptor) in &targets {
            if !self.descriptors.lock().contains_key(id) {
                continue;
            }
            (descriptor.callback)(events);
            delivered += 1;
        }
        delivered
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.descriptors.lock().clear();
    }
}

impl Default for WatcherNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BuilderWatcherFactory for WatcherNotifier {
    fn watch(
        &self,
        files: Vec<PathBuf>,
        directories: Vec<PathBuf>,
        callback: WatchCallback,
    ) -> WatcherHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, files = files.len(), directories = directories.len(), "watch registered");
        self.descriptors.lock().insert(
            id,
            Arc::new(WatchDescriptor {
                files,
                directories,
                callback,
            }),
        );

        let registry: Weak<Registry> = Arc::downgrade(&self.descriptors);
        WatcherHandle::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().shift_remove(&id);
                tracing::debug!(id, "watch closed");
            }
        })
    }
}

impl fmt::Debug for WatcherNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherNotifier")
            .field("watchers", &self.len())
            .field("policy", &self.policy)
            .finish()
    }
}
