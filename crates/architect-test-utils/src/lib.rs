//! Testing utilities for the architect workspace
//!
//! Shared fixtures, canned builders and expectations.

#![allow(missing_docs)]

use architect_core::{
    builder_fn, stream_builder, BuilderOutput, BuilderOutputLike, JsonObject, LogEntry, LogLevel,
    LogSubscription, Logger, SharedHandler, Teardown, WatchEvent,
};
use architect_harness::BuilderHarness;
use futures::stream::{self, StreamExt};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

/// Install a test subscriber honouring `RUST_LOG`, once per process
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Empty temporary workspace root
pub fn temp_workspace() -> TempDir {
    init_tracing();
    tempfile::Builder::new()
        .prefix("architect-harness-")
        .tempdir()
        .unwrap()
}

/// Option bag from a JSON object literal
pub fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Subscribe a buffer to `logger`
pub fn capture_logs(logger: &Logger) -> (Arc<Mutex<Vec<LogEntry>>>, LogSubscription) {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&entries);
    let subscription = logger.subscribe(move |entry| sink.lock().push(entry.clone()));
    (entries, subscription)
}

/// Builder reporting the options and extra arguments it received
///
/// Output fields: `seenOptions`, `extra`, `target`.
pub fn echo_builder() -> SharedHandler {
    builder_fn(|options, context, extra| {
        context.logger().info("echo builder running");
        let target = context.target().map(ToString::to_string);
        Ok(BuilderOutput::success()
            .with_field("seenOptions", Value::Object(options))
            .with_field("extra", Value::Array(extra))
            .with_field("target", json!(target))
            .into())
    })
}

/// Builder returning an unsuccessful output after logging an error
pub fn failing_builder(message: &'static str) -> SharedHandler {
    builder_fn(move |_, context, _| {
        context.logger().error(message);
        Ok(BuilderOutput::failure(message).into())
    })
}

/// Builder that fails before producing any output
pub fn throwing_builder(message: &'static str) -> SharedHandler {
    builder_fn(move |_, context, _| {
        context.logger().warn("about to throw");
        Err(anyhow::anyhow!(message))
    })
}

/// Builder whose future rejects
pub fn rejecting_builder(message: &'static str) -> SharedHandler {
    builder_fn(move |_, _, _| {
        Ok(BuilderOutputLike::future(async move {
            Err(anyhow::anyhow!(message))
        }))
    })
}

/// Builder emitting `count` successful outputs, logging before each
pub fn counting_builder(count: u64) -> SharedHandler {
    stream_builder(move |_, context| {
        let logger = context.logger().clone();
        stream::iter(1..=count).map(move |n| {
            logger.info(format!("build {n}"));
            Ok::<_, anyhow::Error>(BuilderOutput::success().with_field("build", n))
        })
    })
}

/// Watch-mode builder
///
/// Emits one output at start and one per change batch delivered through the
/// context's watcher factory. The output field `changes` lists the batch.
/// The watch is closed by a teardown.
pub fn watch_builder() -> SharedHandler {
    builder_fn(|_, context, _| {
        let factory = context
            .watcher_factory()
            .ok_or_else(|| anyhow::anyhow!("no watcher factory installed"))?;

        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel::<Vec<WatchEvent>>();
        let root = context.workspace_root().to_path_buf();
        let handle = factory.watch(
            Vec::new(),
            vec![root],
            Arc::new(move |events: &[WatchEvent]| {
                let _ = sender.send(events.to_vec());
            }),
        );
        context.add_teardown(Teardown::sync(move || {
            handle.close();
            Ok(())
        }));

        let logger = context.logger().clone();
        let initial = stream::iter([Ok::<_, anyhow::Error>(
            BuilderOutput::success().with_field("changes", json!([])),
        )]);
        let rebuilds = stream::unfold(receiver, move |mut receiver| {
            let logger = logger.clone();
            async move {
                let events = receiver.recv().await?;
                logger.info(format!("rebuilding after {} change(s)", events.len()));
                let changes = serde_json::to_value(&events).unwrap_or_default();
                Some((Ok(BuilderOutput::success().with_field("changes", changes)), receiver))
            }
        });
        Ok(BuilderOutputLike::stream(initial.chain(rebuilds)))
    })
}

/// Expectation on a file under a harness root
pub struct FileExpectation {
    path: PathBuf,
    relative: String,
}

/// Start an expectation on `path`
pub fn expect_file(harness: &BuilderHarness, path: impl AsRef<Path>) -> FileExpectation {
    FileExpectation {
        path: harness.root().join(path.as_ref()),
        relative: path.as_ref().display().to_string(),
    }
}

impl FileExpectation {
    pub fn to_exist(&self) -> &Self {
        assert!(self.path.is_file(), "expected file '{}' to exist", self.relative);
        self
    }

    pub fn to_not_exist(&self) -> &Self {
        assert!(!self.path.exists(), "expected file '{}' to not exist", self.relative);
        self
    }

    pub fn content(&self) -> ContentExpectation {
        let content = std::fs::read_to_string(&self.path)
            .unwrap_or_else(|e| panic!("cannot read '{}': {e}", self.relative));
        ContentExpectation {
            content,
            relative: self.relative.clone(),
        }
    }
}

/// Expectation on a file's content
pub struct ContentExpectation {
    content: String,
    relative: String,
}

impl ContentExpectation {
    pub fn to_contain(&self, needle: &str) -> &Self {
        assert!(
            self.content.contains(needle),
            "expected '{}' to contain {needle:?}, content was:\n{}",
            self.relative,
            self.content
        );
        self
    }

    pub fn to_not_contain(&self, needle: &str) -> &Self {
        assert!(
            !self.content.contains(needle),
            "expected '{}' to not contain {needle:?}",
            self.relative
        );
        self
    }

    pub fn to_match(&self, pattern: &str) -> &Self {
        let regex = Regex::new(pattern).unwrap();
        assert!(
            regex.is_match(&self.content),
            "expected '{}' to match /{pattern}/, content was:\n{}",
            self.relative,
            self.content
        );
        self
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }
}

/// Assert some entry's message contains `needle`
pub fn expect_log(logs: &[LogEntry], needle: &str) {
    assert!(
        logs.iter().any(|entry| entry.message.contains(needle)),
        "expected a log containing {needle:?}, got {:?}",
        logs.iter().map(|e| &e.message).collect::<Vec<_>>()
    );
}

/// Assert some entry at `level` contains `needle`
pub fn expect_log_at(logs: &[LogEntry], level: LogLevel, needle: &str) {
    assert!(
        logs.iter()
            .any(|entry| entry.level == level && entry.message.contains(needle)),
        "expected a {level} log containing {needle:?}"
    );
}

/// Assert no entry's message contains `needle`
pub fn expect_no_log(logs: &[LogEntry], needle: &str) {
    assert!(
        !logs.iter().any(|entry| entry.message.contains(needle)),
        "expected no log containing {needle:?}"
    );
}
