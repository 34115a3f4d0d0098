//! Per-execution options

use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Options for a single harness execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Named option set overlaid on the base options
    pub configuration: Option<String>,
    /// Echo captured logs when a result reports failure
    pub output_logs_on_failure: bool,
    /// Echo captured logs when the builder throws
    pub output_logs_on_exception: bool,
    /// Let builders use real file watching instead of the harness notifier
    pub use_native_file_watching: bool,
    /// Cancellation signal threaded through every context
    pub signal: Option<CancellationToken>,
    /// Extra positional arguments passed to the builder
    pub additional_execute_arguments: Vec<Value>,
}

impl ExecuteOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    /// With failure log echo
    #[inline]
    #[must_use]
    pub fn with_output_logs_on_failure(mut self, enabled: bool) -> Self {
        self.output_logs_on_failure = enabled;
        self
    }

    /// With exception log echo
    #[inline]
    #[must_use]
    pub fn with_output_logs_on_exception(mut self, enabled: bool) -> Self {
        self.output_logs_on_exception = enabled;
        self
    }

    /// With native file watching
    #[inline]
    #[must_use]
    pub fn with_native_file_watching(mut self, enabled: bool) -> Self {
        self.use_native_file_watching = enabled;
        self
    }

    /// With cancellation signal
    #[inline]
    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// With an extra builder argument
    #[inline]
    #[must_use]
    pub fn with_argument(mut self, argument: impl Into<Value>) -> Self {
        self.additional_execute_arguments.push(argument.into());
        self
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            configuration: None,
            output_logs_on_failure: true,
            output_logs_on_exception: true,
            use_native_file_watching: false,
            signal: None,
            additional_execute_arguments: Vec::new(),
        }
    }
}
