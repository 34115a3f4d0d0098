//! Builder harness
//!
//! [`BuilderHarness`] runs one builder under test inside a simulated
//! workspace:
//! 1. **Setup**: project, primary target options per configuration and
//!    auxiliary targets reachable through nested scheduling
//! 2. **Execution**: validate, build a context, invoke, stream snapshots
//! 3. **Files**: read and write under the workspace root, echoing every
//!    change to the installed [`WatcherNotifier`]
//!
//! Clones share the same workspace, registrations and notifier slot.

use crate::config::{HarnessConfig, DEFAULT_BUILDER_NAME};
use crate::context::{start_builder, HarnessBuilderContext};
use crate::execution::{ExecutionResult, ExecutionStream, Finalizer, NotifierGuard};
use crate::host::{BuilderRegistration, ContextHost, HarnessHost, Registry};
use crate::options::ExecuteOptions;
use crate::watcher::{NotifyAll, NotifyPolicy, WatcherNotifier};
use architect_core::{
    BuilderContext, BuilderInfo, HarnessError, JsonObject, JsonSchemaValidator, OutputStream,
    Result, SchemaValidator, SharedHandler, Target, WatchEvent,
};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Check applied to one snapshot of [`BuilderHarness::execute_with_cases`]
pub type WatchCase =
    Box<dyn FnOnce(ExecutionResult) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Build a [`WatchCase`] from an async closure
pub fn case<F, Fut>(f: F) -> WatchCase
where
    F: FnOnce(ExecutionResult) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |result| f(result).boxed())
}

/// Test harness around a builder under test
#[derive(Clone)]
pub struct BuilderHarness {
    root: PathBuf,
    config: HarnessConfig,
    registry: Arc<RwLock<Registry>>,
    validator: Arc<dyn SchemaValidator>,
    notifier: Arc<Mutex<Option<Arc<WatcherNotifier>>>>,
    policy: Arc<dyn NotifyPolicy>,
}

impl BuilderHarness {
    /// Create harness for `handler` rooted at `root`
    #[must_use]
    pub fn new(handler: SharedHandler, root: impl Into<PathBuf>) -> Self {
        let config = HarnessConfig::default();
        let registry = Registry {
            project_name: config.project_name.clone(),
            project_metadata: config.project_metadata.clone(),
            builder: handler,
            builder_info: BuilderInfo::new(DEFAULT_BUILDER_NAME),
            target_name: None,
            options: HashMap::new(),
            builder_targets: IndexMap::new(),
        };
        Self {
            root: root.into(),
            validator: Arc::new(JsonSchemaValidator::new(config.defaults)),
            config,
            registry: Arc::new(RwLock::new(registry)),
            notifier: Arc::new(Mutex::new(None)),
            policy: Arc::new(NotifyAll),
        }
    }

    /// With configuration; resets the project to the configured one
    #[must_use]
    pub fn with_config(mut self, config: HarnessConfig) -> Self {
        {
            let mut registry = self.registry.write();
            registry.project_name = config.project_name.clone();
            registry.project_metadata = config.project_metadata.clone();
        }
        self.validator = Arc::new(JsonSchemaValidator::new(config.defaults));
        self.config = config;
        self
    }

    /// With info of the builder under test
    #[must_use]
    pub fn with_info(self, info: BuilderInfo) -> Self {
        self.registry.write().builder_info = info;
        self
    }

    /// With schema validator
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// With delivery policy for installed notifiers
    #[must_use]
    pub fn with_notify_policy(mut self, policy: Arc<dyn NotifyPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Workspace root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Name of the active project
    #[must_use]
    pub fn project_name(&self) -> String {
        self.registry.read().project_name.clone()
    }

    /// Check if an execution currently holds the notifier
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.notifier.lock().is_some()
    }

    /// Set the active project
    ///
    /// # Errors
    /// `InvalidArgument` if `name` is empty.
    pub fn use_project(&self, name: impl Into<String>, metadata: JsonObject) -> Result<&Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(HarnessError::invalid_argument(
                "Project name cannot be an empty string.",
            ));
        }
        let mut registry = self.registry.write();
        registry.project_name = name;
        registry.project_metadata = metadata;
        Ok(self)
    }

    /// Declare the primary target and its base options
    ///
    /// # Errors
    /// `InvalidArgument` if `name` is empty.
    pub fn use_target(&self, name: impl Into<String>, base_options: JsonObject) -> Result<&Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(HarnessError::invalid_argument(
                "Target name cannot be an empty string.",
            ));
        }
        let mut registry = self.registry.write();
        registry.target_name = Some(name);
        registry.options.insert(None, base_options);
        Ok(self)
    }

    /// Set the options of a named configuration of the primary target
    pub fn with_configuration(&self, name: impl Into<String>, options: JsonObject) -> &Self {
        self.registry.write().options.insert(Some(name.into()), options);
        self
    }

    /// Register an auxiliary target
    ///
    /// Without `info` the builder is named `harness:<target>` and accepts
    /// any options.
    pub fn with_builder_target(
        &self,
        target: impl Into<String>,
        handler: SharedHandler,
        options: Option<JsonObject>,
        info: Option<BuilderInfo>,
    ) -> &Self {
        let target = target.into();
        let info = info.unwrap_or_else(|| BuilderInfo::new(format!("harness:{target}")));
        self.registry.write().builder_targets.insert(
            target,
            BuilderRegistration {
                handler,
                info,
                options: options.unwrap_or_default(),
            },
        );
        self
    }

    /// Change the options of an auxiliary target
    ///
    /// `modifier` may edit the options in place or return a replacement.
    ///
    /// # Errors
    /// `NotFound` if no auxiliary target has that name.
    pub fn modify_target<F>(&self, name: &str, modifier: F) -> Result<&Self>
    where
        F: FnOnce(&mut JsonObject) -> Option<JsonObject>,
    {
        let mut registry = self.registry.write();
        let Some(registration) = registry.builder_targets.get_mut(name) else {
            return Err(HarnessError::not_found(format!(
                "No target named \"{name}\" exists."
            )));
        };
        if let Some(replacement) = modifier(&mut registration.options) {
            registration.options = replacement;
        }
        drop(registry);
        Ok(self)
    }

    /// Start an execution of the builder under test
    ///
    /// Nothing runs until the returned stream is polled. Execution-time
    /// failures arrive as a snapshot with `error` set.
    ///
    /// # Errors
    /// `ConcurrencyViolation` if another execution without native file
    /// watching is still active.
    pub fn execute(&self, options: ExecuteOptions) -> Result<ExecutionStream> {
        let guard = if options.use_native_file_watching {
            None
        } else {
            Some(NotifierGuard::install(
                &self.notifier,
                WatcherNotifier::with_policy(Arc::clone(&self.policy)),
            )?)
        };

        let (handler, info, target, merged) = {
            let registry = self.registry.read();
            let target = registry.target_name.as_ref().map(|name| Target {
                project: registry.project_name.clone(),
                target: name.clone(),
                configuration: options.configuration.clone(),
            });
            (
                Arc::clone(&registry.builder),
                registry.builder_info.clone(),
                target,
                registry.merged_options(options.configuration.as_deref()),
            )
        };

        let host: Arc<dyn ContextHost> = Arc::new(HarnessHost::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.validator),
        ));
        let mut context = HarnessBuilderContext::new(
            info.clone(),
            self.root.clone(),
            Arc::clone(&host),
            guard.as_ref().map(NotifierGuard::notifier),
            self.config.max_schedule_depth,
        );
        if let Some(target) = target {
            context = context.with_target(target);
        }
        if let Some(signal) = &options.signal {
            context = context.with_signal(signal.clone());
        }

        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logs);
        let subscription = context
            .logger()
            .subscribe(move |entry| sink.lock().push(entry.clone()));
        let teardowns = Arc::clone(context.teardowns());
        tracing::debug!(
            id = context.id(),
            builder = %info.builder_name,
            configuration = ?options.configuration,
            "starting execution"
        );

        let context: Arc<dyn BuilderContext> = Arc::new(context);
        let extra = options.additional_execute_arguments.clone();
        let builder_name = info.builder_name.clone();
        let source: OutputStream = stream::once(async move {
            match host.validate(merged, &builder_name).await {
                Ok(validated) => start_builder(&handler, validated, context, extra),
                Err(error) => stream::iter([Err(error)]).boxed(),
            }
        })
        .flatten()
        .boxed();

        Ok(ExecutionStream::new(
            source,
            logs,
            Finalizer::new(guard, subscription, teardowns),
            info.builder_name,
            options.output_logs_on_failure,
            options.output_logs_on_exception,
        ))
    }

    /// Run until the first snapshot, then finalize
    ///
    /// # Errors
    /// `ConcurrencyViolation` as for [`Self::execute`], `EmptyOutput` if the
    /// builder completed without output, or the first teardown failure.
    pub async fn execute_once(&self, options: ExecuteOptions) -> Result<ExecutionResult> {
        let mut execution = self.execute(options)?;
        let first = execution.next().await;
        execution.close().await?;
        first.ok_or_else(|| HarnessError::EmptyOutput(self.builder_name()))
    }

    /// Hand the n-th snapshot to the n-th case, then finalize
    ///
    /// Cases typically change files to trigger the next watch rebuild.
    ///
    /// # Errors
    /// `Timeout` if the cases do not finish within the configured budget,
    /// `EmptyOutput` if the builder stops emitting early, or the first
    /// failing case.
    pub async fn execute_with_cases(
        &self,
        cases: Vec<WatchCase>,
        options: ExecuteOptions,
    ) -> Result<()> {
        let timeout_ms = self.config.default_case_timeout_ms;
        let builder = self.builder_name();
        let mut execution = self.execute(options)?;

        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            for (index, case) in cases.into_iter().enumerate() {
                let Some(result) = execution.next().await else {
                    tracing::debug!(index, "execution completed before all cases ran");
                    return Err(HarnessError::EmptyOutput(builder.clone()));
                };
                case(result).await?;
            }
            Ok(())
        })
        .await;

        let closed = execution.close().await;
        match outcome {
            Err(_) => Err(HarnessError::Timeout { timeout_ms }),
            Ok(result) => result.and(closed),
        }
    }

    fn builder_name(&self) -> String {
        self.registry.read().builder_info.builder_name.clone()
    }

    fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    fn notify(&self, events: &[WatchEvent]) {
        let notifier = self.notifier.lock().clone();
        if let Some(notifier) = notifier {
            notifier.notify(events);
        }
    }

    async fn write_raw(&self, path: &Path, content: &[u8]) -> Result<PathBuf> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HarnessError::io(parent, e))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| HarnessError::io(&resolved, e))?;
        Ok(resolved)
    }

    /// Write a file, creating parent directories
    ///
    /// # Errors
    /// `Io` if the write fails.
    pub async fn write_file(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
        let resolved = self.write_raw(path.as_ref(), content.as_ref()).await?;
        self.notify(&[WatchEvent::modified(resolved)]);
        Ok(())
    }

    /// Write several files and report them as one batch, in input order
    ///
    /// # Errors
    /// `Io` if a write fails; files written before the failure are not
    /// reported.
    pub async fn write_files<I, P, C>(&self, files: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<Path>,
        C: AsRef<[u8]>,
    {
        let mut events = Vec::new();
        for (path, content) in files {
            let resolved = self.write_raw(path.as_ref(), content.as_ref()).await?;
            events.push(WatchEvent::modified(resolved));
        }
        self.notify(&events);
        Ok(())
    }

    /// Append to an existing file
    ///
    /// # Errors
    /// `Io` if the file cannot be read or written.
    pub async fn append_to_file(&self, path: impl AsRef<Path>, content: &str) -> Result<()> {
        let path = path.as_ref();
        let mut current = self.read_file(path).await?;
        current.push_str(content);
        self.write_file(path, current).await
    }

    /// Rewrite an existing file through `modifier`
    ///
    /// Reported as a single change.
    ///
    /// # Errors
    /// `Io` if the file cannot be read or written.
    pub async fn modify_file<F>(&self, path: impl AsRef<Path>, modifier: F) -> Result<()>
    where
        F: FnOnce(String) -> String,
    {
        let path = path.as_ref();
        let current = self.read_file(path).await?;
        self.write_file(path, modifier(current)).await
    }

    /// Delete a file
    ///
    /// # Errors
    /// `Io` if the file cannot be removed.
    pub async fn remove_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let resolved = self.resolve(path);
        tokio::fs::remove_file(&resolved)
            .await
            .map_err(|e| HarnessError::io(&resolved, e))?;
        self.notify(&[WatchEvent::deleted(resolved)]);
        Ok(())
    }

    /// Read a file as UTF-8
    ///
    /// # Errors
    /// `Io` if the file cannot be read.
    pub async fn read_file(&self, path: impl AsRef<Path>) -> Result<String> {
        let resolved = self.resolve(path);
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| HarnessError::io(&resolved, e))
    }

    /// Check if a file exists
    #[must_use]
    pub fn has_file(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_file()
    }

    /// Check if a directory exists
    #[must_use]
    pub fn has_directory(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_dir()
    }

    /// Check if any entry directly inside `directory` has a matching name
    #[must_use]
    pub fn has_file_match(&self, directory: impl AsRef<Path>, pattern: &Regex) -> bool {
        let Ok(entries) = std::fs::read_dir(self.resolve(directory)) else {
            return false;
        };
        entries
            .filter_map(std::result::Result::ok)
            .any(|entry| pattern.is_match(&entry.file_name().to_string_lossy()))
    }
}

impl fmt::Debug for BuilderHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderHarness")
            .field("root", &self.root)
            .field("registry", &*self.registry.read())
            .field("executing", &self.is_executing())
            .finish_non_exhaustive()
    }
}
