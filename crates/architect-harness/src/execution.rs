//! Execution results and the stream that yields them
//!
//! An [`ExecutionStream`] turns a builder's output into
//! [`ExecutionResult`] snapshots:
//! - Each snapshot carries the log entries captured since the previous one
//! - A builder exception becomes a final snapshot with `error` set
//! - Completion (or [`ExecutionStream::close`]) releases the watch notifier,
//!   stops log capture and runs the context's teardowns in order

use crate::watcher::WatcherNotifier;
use architect_core::{
    BuilderOutput, HarnessError, LogEntry, LogSubscription, OutputStream, Teardowns,
};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

const DIAGNOSTICS: &str = "architect_harness::diagnostics";

/// One emitted value of an execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Builder output, unset when the builder threw
    pub result: Option<BuilderOutput>,
    /// Captured builder exception or execution error
    pub error: Option<Arc<HarnessError>>,
    /// Log entries captured since the previous snapshot
    ///
    /// Entries logged after the final output are not attached to any
    /// snapshot; they are traced at debug level when the stream completes.
    pub logs: Vec<LogEntry>,
}

impl ExecutionResult {
    /// Check if the builder produced a successful output
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.as_ref().is_some_and(|output| output.success)
    }

    /// Error message, if any
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Occupies the harness notifier slot for one execution
///
/// Dropping the guard empties the slot and forgets every registered watch.
pub struct NotifierGuard {
    slot: Arc<Mutex<Option<Arc<WatcherNotifier>>>>,
    notifier: Arc<WatcherNotifier>,
}

impl NotifierGuard {
    /// Install `notifier` in an empty slot
    ///
    /// # Errors
    /// `ConcurrencyViolation` when the slot is already taken.
    pub fn install(
        slot: &Arc<Mutex<Option<Arc<WatcherNotifier>>>>,
        notifier: WatcherNotifier,
    ) -> Result<Self, HarnessError> {
        let mut current = slot.lock();
        if current.is_some() {
            return Err(HarnessError::ConcurrencyViolation);
        }
        let notifier = Arc::new(notifier);
        *current = Some(Arc::clone(&notifier));
        Ok(Self {
            slot: Arc::clone(slot),
            notifier,
        })
    }

    /// Installed notifier
    #[inline]
    #[must_use]
    pub fn notifier(&self) -> Arc<WatcherNotifier> {
        Arc::clone(&self.notifier)
    }
}

impl Drop for NotifierGuard {
    fn drop(&mut self) {
        self.slot.lock().take();
        self.notifier.clear();
    }
}

impl fmt::Debug for NotifierGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierGuard")
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

/// Runs the end-of-execution steps exactly once
///
/// Releasing the notifier and log capture may happen before the teardowns
/// run; both are idempotent.
pub(crate) struct Finalizer {
    torn_down: AtomicBool,
    guard: Mutex<Option<NotifierGuard>>,
    subscription: Mutex<Option<LogSubscription>>,
    teardowns: Arc<Teardowns>,
}

impl Finalizer {
    pub(crate) fn new(
        guard: Option<NotifierGuard>,
        subscription: LogSubscription,
        teardowns: Arc<Teardowns>,
    ) -> Self {
        Self {
            torn_down: AtomicBool::new(false),
            guard: Mutex::new(guard),
            subscription: Mutex::new(Some(subscription)),
            teardowns,
        }
    }

    /// Release the notifier and log capture
    fn release(&self) {
        self.guard.lock().take();
        self.subscription.lock().take();
    }

    /// Claim the teardowns; false if already claimed
    fn claim_teardowns(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }

    async fn run(&self) -> Vec<anyhow::Error> {
        self.release();
        if !self.claim_teardowns() {
            return Vec::new();
        }
        let failures = self.teardowns.run_all().await;
        tracing::debug!(failures = failures.len(), "execution finalized");
        failures
    }
}

struct StreamState {
    source: OutputStream,
    logs: Arc<Mutex<Vec<LogEntry>>>,
    finalizer: Arc<Finalizer>,
    builder: String,
    output_logs_on_failure: bool,
    output_logs_on_exception: bool,
    finished: bool,
}

impl StreamState {
    fn drain_logs(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.logs.lock())
    }
}

fn emit_diagnostics(builder: &str, logs: &[LogEntry], error: Option<&HarnessError>) {
    for entry in logs {
        tracing::error!(
            target: DIAGNOSTICS,
            builder,
            level = %entry.level,
            logger = %entry.logger,
            "{}",
            entry.message
        );
    }
    if let Some(error) = error {
        tracing::error!(target: DIAGNOSTICS, builder, error = %error, "builder threw");
    }
}

async fn next_snapshot(mut state: StreamState) -> Option<(ExecutionResult, StreamState)> {
    if state.finished {
        state.finalizer.run().await;
        return None;
    }

    match state.source.next().await {
        Some(Ok(output)) => {
            let logs = state.drain_logs();
            if state.output_logs_on_failure && !output.success && !logs.is_empty() {
                emit_diagnostics(&state.builder, &logs, None);
            }
            tracing::trace!(builder = %state.builder, success = output.success, logs = logs.len(), "snapshot");
            let snapshot = ExecutionResult {
                result: Some(output),
                error: None,
                logs,
            };
            Some((snapshot, state))
        }
        Some(Err(error)) => {
            let logs = state.drain_logs();
            if state.output_logs_on_exception {
                emit_diagnostics(&state.builder, &logs, Some(&error));
            }
            state.finished = true;
            state.finalizer.release();
            let snapshot = ExecutionResult {
                result: None,
                error: Some(Arc::new(error)),
                logs,
            };
            Some((snapshot, state))
        }
        None => {
            for entry in state.drain_logs() {
                tracing::debug!(
                    builder = %state.builder,
                    level = %entry.level,
                    "log entry after the last output: {}",
                    entry.message
                );
            }
            state.finalizer.run().await;
            None
        }
    }
}

/// Lazy sequence of [`ExecutionResult`]s for one execution
///
/// Nothing runs until the stream is first polled. Dropping an unfinished
/// stream releases the notifier at once and spawns the teardowns on the
/// current runtime; use [`ExecutionStream::close`] to await them instead.
pub struct ExecutionStream {
    inner: BoxStream<'static, ExecutionResult>,
    finalizer: Arc<Finalizer>,
}

impl ExecutionStream {
    #[allow(clippy::fn_params_excessive_bools)]
    pub(crate) fn new(
        source: OutputStream,
        logs: Arc<Mutex<Vec<LogEntry>>>,
        finalizer: Finalizer,
        builder: String,
        output_logs_on_failure: bool,
        output_logs_on_exception: bool,
    ) -> Self {
        let finalizer = Arc::new(finalizer);
        let state = StreamState {
            source,
            logs,
            finalizer: Arc::clone(&finalizer),
            builder,
            output_logs_on_failure,
            output_logs_on_exception,
            finished: false,
        };
        Self {
            inner: stream::unfold(state, next_snapshot).boxed(),
            finalizer,
        }
    }

    /// Stop consuming and finalize
    ///
    /// # Errors
    /// Returns the first teardown failure after every teardown has run.
    pub async fn close(self) -> Result<(), HarnessError> {
        let failures = self.finalizer.run().await;
        match failures.into_iter().next() {
            Some(error) => Err(HarnessError::Builder(error)),
            None => Ok(()),
        }
    }
}

impl Stream for ExecutionStream {
    type Item = ExecutionResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for ExecutionStream {
    fn drop(&mut self) {
        self.finalizer.release();
        if !self.finalizer.claim_teardowns() {
            return;
        }
        let teardowns = Arc::clone(&self.finalizer.teardowns);
        if teardowns.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    teardowns.run_all().await;
                });
            }
            Err(_) => {
                tracing::warn!(pending = teardowns.len(), "execution dropped outside a runtime, teardowns skipped");
            }
        }
    }
}

impl fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("finalized", &self.finalizer.torn_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use architect_core::{Logger, Teardown};
    use std::sync::atomic::AtomicUsize;

    fn execution(source: OutputStream, logger: &Logger, teardowns: Arc<Teardowns>) -> ExecutionStream {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logs);
        let subscription = logger.subscribe(move |entry| sink.lock().push(entry.clone()));
        ExecutionStream::new(
            source,
            logs,
            Finalizer::new(None, subscription, teardowns),
            "test-builder".to_string(),
            true,
            true,
        )
    }

    #[tokio::test]
    async fn snapshots_pair_logs_with_outputs() {
        let logger = Logger::new("root");
        let emitter = logger.clone();
        let source = stream::iter(1..=2)
            .then(move |n| {
                let emitter = emitter.clone();
                async move {
                    emitter.info(format!("run {n}"));
                    Ok(BuilderOutput::success().with_field("n", n))
                }
            })
            .boxed();

        let snapshots: Vec<_> = execution(source, &logger, Arc::new(Teardowns::new()))
            .collect()
            .await;

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].logs.len(), 1);
        assert_eq!(snapshots[0].logs[0].message, "run 1");
        assert_eq!(snapshots[1].logs[0].message, "run 2");
    }

    #[tokio::test]
    async fn error_ends_stream_and_runs_teardowns() {
        let logger = Logger::new("root");
        let teardowns = Arc::new(Teardowns::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        teardowns.push(Teardown::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let source = stream::iter([
            Err(HarnessError::from(anyhow::anyhow!("boom"))),
            Ok(BuilderOutput::success()),
        ])
        .boxed();
        let snapshots: Vec<_> = execution(source, &logger, teardowns).collect().await;

        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].result.is_none());
        assert_eq!(snapshots[0].error_message().as_deref(), Some("boom"));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_snapshot_releases_guard_before_teardowns() {
        let logger = Logger::new("root");
        let slot = Arc::new(Mutex::new(None));
        let guard = NotifierGuard::install(&slot, WatcherNotifier::new()).unwrap();
        let teardowns = Arc::new(Teardowns::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        teardowns.push(Teardown::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logs);
        let subscription = logger.subscribe(move |entry| sink.lock().push(entry.clone()));
        let mut execution = ExecutionStream::new(
            stream::iter([Err(HarnessError::from(anyhow::anyhow!("boom")))]).boxed(),
            Arc::clone(&logs),
            Finalizer::new(Some(guard), subscription, teardowns),
            "test-builder".to_string(),
            false,
            false,
        );

        let snapshot = execution.next().await.unwrap();
        assert_eq!(snapshot.error_message().as_deref(), Some("boom"));
        assert!(slot.lock().is_none());
        logger.info("after error");
        assert!(logs.lock().is_empty());
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        assert!(execution.next().await.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        execution.close().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn trailing_logs_are_not_attached() {
        let logger = Logger::new("root");
        let emitter = logger.clone();
        let trailing = stream::once(async move { emitter.info("after last output") })
            .filter_map(|()| async { None::<Result<BuilderOutput, HarnessError>> });
        let source = stream::iter([Ok(BuilderOutput::success())])
            .chain(trailing)
            .boxed();

        let snapshots: Vec<_> = execution(source, &logger, Arc::new(Teardowns::new()))
            .collect()
            .await;

        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].logs.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_with_completion() {
        let logger = Logger::new("root");
        let teardowns = Arc::new(Teardowns::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        teardowns.push(Teardown::future(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let mut execution = execution(
            stream::iter([Ok(BuilderOutput::success())]).boxed(),
            &logger,
            teardowns,
        );
        assert!(execution.next().await.is_some());
        assert!(execution.next().await.is_none());
        execution.close().await.unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_reports_teardown_failure() {
        let logger = Logger::new("root");
        let teardowns = Arc::new(Teardowns::new());
        teardowns.push(Teardown::sync(|| Err(anyhow::anyhow!("cleanup failed"))));

        let execution = execution(stream::pending().boxed(), &logger, teardowns);
        let err = execution.close().await.unwrap_err();
        assert_eq!(err.to_string(), "cleanup failed");
    }

    #[test]
    fn notifier_guard_rejects_second_install() {
        let slot = Arc::new(Mutex::new(None));
        let guard = NotifierGuard::install(&slot, WatcherNotifier::new()).unwrap();
        let err = NotifierGuard::install(&slot, WatcherNotifier::new()).unwrap_err();
        assert_eq!(err.kind(), architect_core::ErrorKind::ConcurrencyViolation);

        drop(guard);
        assert!(slot.lock().is_none());
        assert!(NotifierGuard::install(&slot, WatcherNotifier::new()).is_ok());
    }
}
