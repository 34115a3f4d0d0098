//! Architect Core (architect-core)
//!
//! The builder contract shared by builders and the environments that run
//! them:
//! 1. **Identity**: [`Target`], [`BuilderInfo`], [`OptionSchema`]
//! 2. **Output**: [`BuilderOutput`] and its three return shapes, normalized
//!    into one [`OutputStream`]
//! 3. **Context**: the [`BuilderContext`] trait, [`Logger`], teardowns and
//!    nested [`BuilderRun`]s
//! 4. **Watching**: the [`BuilderWatcherFactory`] seam
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use architect_core::prelude::*;
//!
//! let handler = async_builder(|options, context| async move {
//!     context.logger().info("building");
//!     Ok(BuilderOutput::success().with_field("seenOptions", Value::Object(options)))
//! });
//! ```

pub mod builder;
pub mod context;
pub mod error;
pub mod logging;
pub mod output;
pub mod run;
pub mod schema;
pub mod target;
pub mod watch;

// Re-exports
pub use builder::{async_builder, builder_fn, stream_builder, BuilderHandler, BuilderInfo, OptionSchema, SharedHandler};
pub use context::{BuilderContext, ScheduleOptions};
pub use error::{ErrorKind, HarnessError, Result};
pub use logging::{LogEntry, LogLevel, LogSubscription, Logger};
pub use output::{BuilderOutput, BuilderOutputLike, OutputStream};
pub use run::{
    BuilderProgressReport, BuilderProgressState, BuilderRun, SharedOutput, SharedResult, Teardown,
    Teardowns,
};
pub use schema::{DefaultsMode, JsonSchemaValidator, SchemaValidator};
pub use target::{ProjectRef, Target};
pub use watch::{BuilderWatcherFactory, WatchCallback, WatchEvent, WatchEventKind, WatcherHandle};

/// JSON object used for option bags and metadata
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Common imports for builder authors
pub mod prelude {
    pub use crate::builder::{async_builder, builder_fn, stream_builder, BuilderInfo, SharedHandler};
    pub use crate::context::{BuilderContext, ScheduleOptions};
    pub use crate::error::{ErrorKind, HarnessError};
    pub use crate::logging::{LogEntry, LogLevel, Logger};
    pub use crate::output::{BuilderOutput, BuilderOutputLike};
    pub use crate::run::{BuilderRun, Teardown};
    pub use crate::target::Target;
    pub use crate::watch::{BuilderWatcherFactory, WatchEvent, WatchEventKind};
    pub use crate::JsonObject;
    pub use serde_json::Value;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
