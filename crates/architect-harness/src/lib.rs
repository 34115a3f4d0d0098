//! Architect Harness (architect-harness)
//!
//! In-process simulation of the builder execution contract for driving
//! builder integration tests:
//! 1. **Harness**: [`BuilderHarness`] registers the builder under test,
//!    its options per configuration and auxiliary targets
//! 2. **Context**: [`HarnessBuilderContext`] resolves targets through a
//!    [`ContextHost`] and schedules nested runs
//! 3. **Watching**: [`WatcherNotifier`] delivers synthetic file events
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use architect_harness::prelude::*;
//!
//! let harness = BuilderHarness::new(handler, workspace_root);
//! harness.use_target("build", options)?;
//!
//! let result = harness.execute_once(ExecuteOptions::new()).await?;
//! assert!(result.is_success());
//! ```

pub mod config;
pub mod context;
pub mod execution;
pub mod harness;
pub mod host;
pub mod options;
pub mod watcher;

// Re-exports
pub use config::{HarnessConfig, DEFAULT_BUILDER_NAME, DEFAULT_PROJECT_NAME};
pub use context::HarnessBuilderContext;
pub use execution::{ExecutionResult, ExecutionStream, NotifierGuard};
pub use harness::{case, BuilderHarness, WatchCase};
pub use host::{BuilderRegistration, ContextHost, HarnessHost, Registry};
pub use options::ExecuteOptions;
pub use watcher::{NotifyAll, NotifyPolicy, PathScoped, WatchDescriptor, WatcherNotifier};

/// Common imports for harness tests
pub mod prelude {
    pub use crate::config::HarnessConfig;
    pub use crate::execution::{ExecutionResult, ExecutionStream};
    pub use crate::harness::{case, BuilderHarness, WatchCase};
    pub use crate::options::ExecuteOptions;
    pub use crate::watcher::{NotifyAll, PathScoped};
    pub use architect_core::prelude::*;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
