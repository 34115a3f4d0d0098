//! Builder-facing logger
//!
//! A [`Logger`] is a named node in a tree. Entries emitted on a logger are
//! delivered synchronously to its own subscribers and then to the
//! subscribers of every ancestor, so a subscription on a parent observes the
//! entries of all child loggers in emission order.
//!
//! Every entry is also forwarded to `tracing`.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug output
    Debug,
    /// Informational output
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
    /// Unrecoverable error
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// A single captured log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
    /// Dotted path of the emitting logger
    pub logger: String,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

type Subscriber = Arc<dyn Fn(&LogEntry) + Send + Sync>;

struct LoggerNode {
    name: String,
    path: String,
    parent: Option<Arc<LoggerNode>>,
    subscribers: Mutex<IndexMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
}

/// Hierarchical, subscribable logger
///
/// Cloning yields a handle to the same logger.
#[derive(Clone)]
pub struct Logger {
    node: Arc<LoggerNode>,
}

impl Logger {
    /// Create root logger
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            node: Arc::new(LoggerNode {
                path: name.clone(),
                name,
                parent: None,
                subscribers: Mutex::new(IndexMap::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Create a child whose entries also reach this logger's subscribers
    #[must_use]
    pub fn create_child(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = match (self.node.path.is_empty(), name.is_empty()) {
            (_, true) => self.node.path.clone(),
            (true, false) => name.clone(),
            (false, false) => format!("{}.{}", self.node.path, name),
        };
        Self {
            node: Arc::new(LoggerNode {
                name,
                path,
                parent: Some(Arc::clone(&self.node)),
                subscribers: Mutex::new(IndexMap::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Logger name (last path segment)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Dotted path from the root logger
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.node.path
    }

    /// Register a subscriber
    ///
    /// The subscription stays active until the returned guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, subscriber: F) -> LogSubscription
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        let id = self.node.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.node.subscribers.lock().insert(id, Arc::new(subscriber));
        LogSubscription {
            node: Arc::downgrade(&self.node),
            id,
        }
    }

    /// Emit an entry
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            level,
            message: message.into(),
            logger: self.node.path.clone(),
            timestamp: Utc::now(),
        };

        match level {
            LogLevel::Debug => tracing::debug!(logger = %entry.logger, "{}", entry.message),
            LogLevel::Info => tracing::info!(logger = %entry.logger, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(logger = %entry.logger, "{}", entry.message),
            LogLevel::Error | LogLevel::Fatal => {
                tracing::error!(logger = %entry.logger, level = %level, "{}", entry.message);
            }
        }

        let mut node = Some(&self.node);
        while let Some(current) = node {
            // Snapshot so subscribers may subscribe or unsubscribe re-entrantly.
            let subscribers: Vec<Subscriber> =
                current.subscribers.lock().values().cloned().collect();
            for subscriber in subscribers {
                subscriber(&entry);
            }
            node = current.parent.as_ref();
        }
    }

    /// Emit a debug entry
    #[inline]
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    /// Emit an info entry
    #[inline]
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Emit a warning entry
    #[inline]
    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    /// Emit an error entry
    #[inline]
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Emit a fatal entry
    #[inline]
    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogLevel::Fatal, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("path", &self.node.path)
            .field("subscribers", &self.node.subscribers.lock().len())
            .finish()
    }
}

/// Active subscription on a [`Logger`]
#[derive(Debug)]
pub struct LogSubscription {
    node: Weak<LoggerNode>,
    id: u64,
}

impl LogSubscription {
    /// Stop receiving entries
    #[inline]
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(node) = self.node.upgrade() {
            node.subscribers.lock().shift_remove(&self.id);
        }
    }
}
