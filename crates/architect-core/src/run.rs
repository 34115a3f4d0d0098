//! Scheduled runs and teardown bookkeeping
//!
//! - [`Teardowns`]: per-context list of cleanup callbacks
//! - [`SharedOutput`]: replayable view over a builder's output stream
//! - [`BuilderRun`]: handle returned by nested scheduling

use crate::builder::BuilderInfo;
use crate::error::HarnessError;
use crate::output::{BuilderOutput, OutputStream};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Cleanup callback registered by a builder
pub enum Teardown {
    /// Runs to completion synchronously
    Sync(Box<dyn FnOnce() -> anyhow::Result<()> + Send>),
    /// Returns a future that is awaited
    Async(Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>),
}

impl Teardown {
    /// Synchronous teardown
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    /// Asynchronous teardown
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Box::new(move || f().boxed()))
    }

    async fn run(self) -> anyhow::Result<()> {
        match self {
            Self::Sync(f) => f(),
            Self::Async(f) => f().await,
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Teardown::Sync"),
            Self::Async(_) => f.write_str("Teardown::Async"),
        }
    }
}

/// Ordered teardown list owned by one context
#[derive(Debug, Default)]
pub struct Teardowns {
    list: Mutex<Vec<Teardown>>,
}

impl Teardowns {
    /// Create empty list
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a teardown
    pub fn push(&self, teardown: Teardown) {
        self.list.lock().push(teardown);
    }

    /// Number of pending teardowns
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    /// Check if nothing is pending
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }

    /// Run and drain every pending teardown in registration order
    ///
    /// A failing teardown does not stop the rest; all failures are returned.
    pub async fn run_all(&self) -> Vec<anyhow::Error> {
        let pending = std::mem::take(&mut *self.list.lock());
        let mut failures = Vec::new();
        for teardown in pending {
            if let Err(error) = teardown.run().await {
                tracing::warn!(error = %error, "teardown failed");
                failures.push(error);
            }
        }
        failures
    }
}

/// A value emitted on a shared output
pub type SharedResult = Result<BuilderOutput, Arc<HarnessError>>;

struct ReplayState {
    source: Option<OutputStream>,
    values: Vec<SharedResult>,
}

/// Replayable output
///
/// The underlying stream is polled at most once per value; every reader
/// observes the same values in the same order. The first error terminates
/// the output.
#[derive(Clone)]
pub struct SharedOutput {
    builder: Arc<str>,
    state: Arc<tokio::sync::Mutex<ReplayState>>,
}

impl SharedOutput {
    /// Share a normalized output stream
    #[must_use]
    pub fn new(builder: impl Into<Arc<str>>, source: OutputStream) -> Self {
        Self {
            builder: builder.into(),
            state: Arc::new(tokio::sync::Mutex::new(ReplayState {
                source: Some(source),
                values: Vec::new(),
            })),
        }
    }

    /// Value at `index`, pulling from the source when not yet buffered
    pub async fn get(&self, index: usize) -> Option<SharedResult> {
        let mut state = self.state.lock().await;
        loop {
            if let Some(value) = state.values.get(index) {
                return Some(value.clone());
            }
            let source = state.source.as_mut()?;
            match source.next().await {
                Some(value) => {
                    let value = value.map_err(Arc::new);
                    if value.is_err() {
                        state.source = None;
                    }
                    state.values.push(value);
                }
                None => state.source = None,
            }
        }
    }

    /// Independent reader starting at the first value
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, SharedResult> {
        stream::unfold((self.clone(), 0usize), |(shared, index)| async move {
            let value = shared.get(index).await?;
            Some((value, (shared, index + 1)))
        })
        .boxed()
    }

    /// First emitted value
    pub async fn first(&self) -> SharedResult {
        match self.get(0).await {
            Some(value) => value,
            None => Err(Arc::new(HarnessError::EmptyOutput(self.builder.to_string()))),
        }
    }

    /// Last emitted value, waiting for the output to complete
    pub async fn last(&self) -> SharedResult {
        let mut index = 0;
        let mut last = None;
        while let Some(value) = self.get(index).await {
            last = Some(value);
            index += 1;
        }
        last.unwrap_or_else(|| Err(Arc::new(HarnessError::EmptyOutput(self.builder.to_string()))))
    }
}

impl fmt::Debug for SharedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedOutput")
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

/// Progress state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderProgressState {
    /// Not started
    Waiting,
    /// Running
    Running,
    /// Finished with an error
    Error,
    /// Finished and idle
    Stopped,
}

/// Progress report published on a run's progress channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderProgressReport {
    /// Context id of the run
    pub id: u64,
    /// Current state
    pub state: BuilderProgressState,
    /// Free text status
    pub status: Option<String>,
    /// Units of work done
    pub current: u64,
    /// Total units of work, if known
    pub total: Option<u64>,
}

const PROGRESS_BUFFER: usize = 16;

/// Handle to a target scheduled from inside a builder
pub struct BuilderRun {
    id: u64,
    info: BuilderInfo,
    output: SharedOutput,
    teardowns: Arc<Teardowns>,
    progress: Mutex<Option<broadcast::Sender<BuilderProgressReport>>>,
}

impl BuilderRun {
    /// Create run over a started builder's output
    #[must_use]
    pub fn new(id: u64, info: BuilderInfo, output: OutputStream, teardowns: Arc<Teardowns>) -> Self {
        let (sender, _) = broadcast::channel(PROGRESS_BUFFER);
        Self {
            id,
            output: SharedOutput::new(info.builder_name.as_str(), output),
            info,
            teardowns,
            progress: Mutex::new(Some(sender)),
        }
    }

    /// Context id of the scheduled builder
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Scheduled builder's info
    #[inline]
    #[must_use]
    pub fn info(&self) -> &BuilderInfo {
        &self.info
    }

    /// Replayable output
    #[inline]
    #[must_use]
    pub fn output(&self) -> &SharedOutput {
        &self.output
    }

    /// First output value
    pub async fn result(&self) -> SharedResult {
        self.output.first().await
    }

    /// Last output value
    pub async fn last_output(&self) -> SharedResult {
        self.output.last().await
    }

    /// Subscribe to progress reports
    ///
    /// The receiver reports `Closed` once the run is stopped.
    #[must_use]
    pub fn progress(&self) -> broadcast::Receiver<BuilderProgressReport> {
        match self.progress.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Run the scheduled context's teardowns and close the progress channel
    ///
    /// Safe to call more than once; later calls find nothing to run.
    ///
    /// # Errors
    /// Returns the first teardown failure after every teardown has run.
    pub async fn stop(&self) -> Result<(), HarnessError> {
        let failures = self.teardowns.run_all().await;
        self.progress.lock().take();
        match failures.into_iter().next() {
            Some(error) => Err(HarnessError::Builder(error)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for BuilderRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderRun")
            .field("id", &self.id)
            .field("builder", &self.info.builder_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BuilderOutputLike;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_stream(polls: Arc<AtomicUsize>, count: u64) -> OutputStream {
        stream::iter(0..count)
            .map(move |n| {
                polls.fetch_add(1, Ordering::SeqCst);
                Ok(BuilderOutput::success().with_field("n", n))
            })
            .boxed()
    }

    #[tokio::test]
    async fn teardowns_run_in_order_and_drain() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let teardowns = Teardowns::new();

        let first = Arc::clone(&order);
        teardowns.push(Teardown::sync(move || {
            first.lock().push(1);
            Ok(())
        }));
        let second = Arc::clone(&order);
        teardowns.push(Teardown::future(move || async move {
            second.lock().push(2);
            Ok(())
        }));

        assert_eq!(teardowns.len(), 2);
        assert!(teardowns.run_all().await.is_empty());
        assert!(teardowns.is_empty());
        assert_eq!(*order.lock(), [1, 2]);
    }

    #[tokio::test]
    async fn failing_teardown_does_not_stop_others() {
        let ran = Arc::new(AtomicUsize::new(0));
        let teardowns = Teardowns::new();

        teardowns.push(Teardown::sync(|| Err(anyhow::anyhow!("first fails"))));
        let counter = Arc::clone(&ran);
        teardowns.push(Teardown::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let failures = teardowns.run_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shared_output_polls_source_once_per_value() {
        let polls = Arc::new(AtomicUsize::new(0));
        let shared = SharedOutput::new("counter", counting_stream(Arc::clone(&polls), 3));

        let first = shared.first().await.unwrap();
        assert_eq!(first.field("n"), Some(&serde_json::json!(0)));
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        let last = shared.last().await.unwrap();
        assert_eq!(last.field("n"), Some(&serde_json::json!(2)));

        let replayed: Vec<_> = shared.subscribe().collect().await;
        assert_eq!(replayed.len(), 3);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shared_output_stops_at_first_error() {
        let source = stream::iter([
            Err(HarnessError::from(anyhow::anyhow!("boom"))),
            Ok(BuilderOutput::success()),
        ])
        .boxed();
        let shared = SharedOutput::new("failing", source);

        let values: Vec<_> = shared.subscribe().collect().await;
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].as_ref().unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn empty_output_reports_error() {
        let shared = SharedOutput::new("silent", stream::empty().boxed());
        let err = shared.first().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::EmptyOutput);
    }

    #[tokio::test]
    async fn stop_runs_teardowns_and_closes_progress() {
        let teardowns = Arc::new(Teardowns::new());
        let stopped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stopped);
        teardowns.push(Teardown::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let run = BuilderRun::new(
            7,
            BuilderInfo::new("aux"),
            BuilderOutputLike::from(BuilderOutput::success()).into_stream(),
            Arc::clone(&teardowns),
        );
        let mut progress = run.progress();

        assert!(run.result().await.unwrap().success);
        run.stop().await.unwrap();
        run.stop().await.unwrap();

        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(matches!(
            progress.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(matches!(
            run.progress().recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
