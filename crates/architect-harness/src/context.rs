//! Simulated builder context
//!
//! One [`HarnessBuilderContext`] exists per builder invocation, nested
//! scheduled runs included. Nested contexts share the workspace root,
//! signal, watcher and host of their parent but own their teardowns.

use crate::host::ContextHost;
use crate::watcher::WatcherNotifier;
use architect_core::{
    BuilderContext, BuilderInfo, BuilderRun, BuilderWatcherFactory, HarnessError, JsonObject,
    Logger, OutputStream, ProjectRef, Result, ScheduleOptions, SharedHandler, Target, Teardown,
    Teardowns,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Builder context backed by a [`ContextHost`]
pub struct HarnessBuilderContext {
    id: u64,
    info: BuilderInfo,
    workspace_root: PathBuf,
    current_directory: PathBuf,
    target: Option<Target>,
    logger: Logger,
    signal: CancellationToken,
    watcher: Option<Arc<WatcherNotifier>>,
    host: Arc<dyn ContextHost>,
    teardowns: Arc<Teardowns>,
    depth: usize,
    max_depth: usize,
}

impl HarnessBuilderContext {
    /// Create a top-level context
    ///
    /// The logger is named `builder-harness-<id>` unless one is given.
    #[must_use]
    pub fn new(
        info: BuilderInfo,
        workspace_root: impl Into<PathBuf>,
        host: Arc<dyn ContextHost>,
        watcher: Option<Arc<WatcherNotifier>>,
        max_depth: usize,
    ) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let workspace_root = workspace_root.into();
        Self {
            id,
            info,
            current_directory: workspace_root.clone(),
            workspace_root,
            target: None,
            logger: Logger::new(format!("builder-harness-{id}")),
            signal: CancellationToken::new(),
            watcher,
            host,
            teardowns: Arc::new(Teardowns::new()),
            depth: 0,
            max_depth,
        }
    }

    /// With target identity
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// With cancellation signal
    #[inline]
    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    /// With logger
    #[inline]
    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Teardowns registered on this context
    #[inline]
    #[must_use]
    pub fn teardowns(&self) -> &Arc<Teardowns> {
        &self.teardowns
    }

    /// Nesting depth, zero for the top-level context
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn child(&self, info: BuilderInfo, target: Target, logger: Logger) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            info,
            workspace_root: self.workspace_root.clone(),
            current_directory: self.current_directory.clone(),
            target: Some(target),
            logger,
            signal: self.signal.clone(),
            watcher: self.watcher.clone(),
            host: Arc::clone(&self.host),
            teardowns: Arc::new(Teardowns::new()),
            depth: self.depth + 1,
            max_depth: self.max_depth,
        }
    }
}

/// Invoke a builder and normalize whatever it returns
///
/// A builder that fails before returning yields a stream holding that one
/// error.
pub fn start_builder(
    handler: &SharedHandler,
    options: JsonObject,
    context: Arc<dyn BuilderContext>,
    extra: Vec<Value>,
) -> OutputStream {
    match handler.run(options, context, extra) {
        Ok(output) => output.into_stream(),
        Err(error) => stream::iter([Err(HarnessError::from(error))]).boxed(),
    }
}

#[async_trait]
impl BuilderContext for HarnessBuilderContext {
    fn id(&self) -> u64 {
        self.id
    }

    fn builder(&self) -> &BuilderInfo {
        &self.info
    }

    fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn current_directory(&self) -> &Path {
        &self.current_directory
    }

    fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    fn logger(&self) -> &Logger {
        &self.logger
    }

    fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    fn watcher_factory(&self) -> Option<Arc<dyn BuilderWatcherFactory>> {
        self.watcher
            .clone()
            .map(|watcher| watcher as Arc<dyn BuilderWatcherFactory>)
    }

    fn add_teardown(&self, teardown: Teardown) {
        self.teardowns.push(teardown);
    }

    async fn get_builder_name_for_target(&self, target: &Target) -> Result<String> {
        self.host.get_builder_name(&target.project, &target.target).await
    }

    async fn get_project_metadata(&self, project: ProjectRef<'_>) -> Result<JsonObject> {
        self.host.get_metadata(project.project()).await
    }

    async fn get_target_options(&self, target: &Target) -> Result<JsonObject> {
        self.host
            .get_options(&target.project, &target.target, target.configuration.as_deref())
            .await
    }

    async fn validate_options(
        &self,
        options: JsonObject,
        builder_name: &str,
    ) -> Result<JsonObject> {
        self.host.validate(options, builder_name).await
    }

    async fn schedule_target(
        &self,
        target: &Target,
        overrides: Option<JsonObject>,
        options: ScheduleOptions,
    ) -> Result<BuilderRun> {
        if self.depth >= self.max_depth {
            return Err(HarnessError::ScheduleDepthExceeded {
                max_depth: self.max_depth,
            });
        }

        let (info, handler) = self
            .host
            .find_builder_by_target(&target.project, &target.target)
            .await?;

        let mut target_options = self.get_target_options(target).await?;
        if let Some(overrides) = overrides {
            target_options.extend(overrides);
        }
        let validated = self.validate_options(target_options, &info.builder_name).await?;

        let logger = options
            .logger
            .unwrap_or_else(|| self.logger.create_child(""));
        let context = self.child(info.clone(), target.clone(), logger);
        let id = context.id;
        let teardowns = Arc::clone(&context.teardowns);
        tracing::debug!(parent = self.id, id, target = %target, depth = context.depth, "scheduling target");

        let output = start_builder(&handler, validated, Arc::new(context), Vec::new());
        Ok(BuilderRun::new(id, info, output, teardowns))
    }

    async fn schedule_builder(
        &self,
        builder_name: &str,
        _options: Option<JsonObject>,
        _schedule: ScheduleOptions,
    ) -> Result<BuilderRun> {
        Err(HarnessError::Unsupported(format!(
            "scheduleBuilder('{builder_name}')"
        )))
    }
}

impl fmt::Debug for HarnessBuilderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessBuilderContext")
            .field("id", &self.id)
            .field("builder", &self.info.builder_name)
            .field("target", &self.target)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
