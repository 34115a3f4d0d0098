//! Builder context contract
//!
//! The [`BuilderContext`] is a builder's only way to reach the outside world:
//! - Workspace lookups (builder names, project metadata, target options)
//! - Option validation against a named builder's schema
//! - Nested scheduling of other targets
//! - Logging and teardown registration

use crate::builder::BuilderInfo;
use crate::error::Result;
use crate::logging::Logger;
use crate::run::{BuilderRun, Teardown};
use crate::target::{ProjectRef, Target};
use crate::watch::BuilderWatcherFactory;
use crate::JsonObject;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Options for [`BuilderContext::schedule_target`]
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Logger for the scheduled run; a child of the scheduling context's
    /// logger when absent
    pub logger: Option<Logger>,
}

impl ScheduleOptions {
    /// With explicit logger
    #[inline]
    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }
}

/// Context handed to a running builder
#[async_trait]
pub trait BuilderContext: Send + Sync {
    /// Identifier, unique per context
    fn id(&self) -> u64;

    /// Info of the running builder
    fn builder(&self) -> &BuilderInfo;

    /// Workspace root
    fn workspace_root(&self) -> &Path;

    /// Directory the builder was invoked from
    fn current_directory(&self) -> &Path;

    /// Target being built, if the builder runs for a target
    fn target(&self) -> Option<&Target>;

    /// Logger capturing this invocation's output
    fn logger(&self) -> &Logger;

    /// Cancellation signal supplied by the caller
    fn signal(&self) -> &CancellationToken;

    /// Watcher factory to use instead of OS file watching, if installed
    fn watcher_factory(&self) -> Option<Arc<dyn BuilderWatcherFactory>>;

    /// Register cleanup to run when this invocation ends
    fn add_teardown(&self, teardown: Teardown);

    /// Builder name configured for a target
    async fn get_builder_name_for_target(&self, target: &Target) -> Result<String>;

    /// Metadata of a project
    async fn get_project_metadata(&self, project: ProjectRef<'_>) -> Result<JsonObject>;

    /// Options configured for a target, with its configuration applied
    async fn get_target_options(&self, target: &Target) -> Result<JsonObject>;

    /// Validate options against a builder's schema
    async fn validate_options(&self, options: JsonObject, builder_name: &str)
        -> Result<JsonObject>;

    /// Start another target
    ///
    /// `overrides` win over the target's configured options.
    async fn schedule_target(
        &self,
        target: &Target,
        overrides: Option<JsonObject>,
        options: ScheduleOptions,
    ) -> Result<BuilderRun>;

    /// Start a builder by name
    async fn schedule_builder(
        &self,
        builder_name: &str,
        options: Option<JsonObject>,
        schedule: ScheduleOptions,
    ) -> Result<BuilderRun>;

    /// Report the builder as running
    fn report_running(&self) {}

    /// Report a status line
    fn report_status(&self, _status: &str) {}

    /// Report progress
    fn report_progress(&self, _current: u64, _total: Option<u64>, _status: Option<&str>) {}
}
