//! Error types for the builder contract
//!
//! A single [`HarnessError`] covers:
//! - Setup mistakes (empty names, concurrent executions)
//! - Lookups of unknown projects and targets
//! - Option schema validation
//! - Builder exceptions (anything a builder returns as `Err`)

use std::sync::Arc;

/// Main error type shared by the harness and builder contexts
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Empty or malformed setup input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown project, target or registration
    #[error("not found: {0}")]
    NotFound(String),

    /// Option bag rejected by the builder's schema
    #[error("validation failed for '{builder}': {}", .errors.join("; "))]
    Validation {
        /// Builder whose schema rejected the options
        builder: String,
        /// One entry per violation, `<instance path>: <message>`
        errors: Vec<String>,
    },

    /// Option schema could not be compiled
    #[error("invalid option schema for '{builder}': {message}")]
    Schema {
        /// Builder owning the schema
        builder: String,
        /// Compiler message
        message: String,
    },

    /// A second watch-simulating execution was started on the same harness
    #[error("only one harness execution at a time is supported")]
    ConcurrencyViolation,

    /// Operation the simulated context does not model
    #[error("not supported by the harness context: {0}")]
    Unsupported(String),

    /// Nested scheduling went deeper than the configured limit
    #[error("schedule depth exceeded (max: {max_depth})")]
    ScheduleDepthExceeded {
        /// Configured limit
        max_depth: usize,
    },

    /// Builder output completed without emitting a value
    #[error("builder '{0}' completed without emitting a result")]
    EmptyOutput(String),

    /// Execution cases were not satisfied in time
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Elapsed budget in milliseconds
        timeout_ms: u64,
    },

    /// IO error in a file convenience operation
    #[error("io error on {path}: {source}")]
    Io {
        /// Resolved path
        path: std::path::PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Error raised by the builder itself
    #[error(transparent)]
    Builder(#[from] anyhow::Error),

    /// Error shared with other readers of the same output
    #[error(transparent)]
    Shared(Arc<HarnessError>),
}

/// Flat classification of [`HarnessError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`HarnessError::InvalidArgument`]
    InvalidArgument,
    /// See [`HarnessError::NotFound`]
    NotFound,
    /// See [`HarnessError::Validation`] and [`HarnessError::Schema`]
    Validation,
    /// See [`HarnessError::ConcurrencyViolation`]
    ConcurrencyViolation,
    /// See [`HarnessError::Unsupported`]
    Unsupported,
    /// See [`HarnessError::ScheduleDepthExceeded`]
    ScheduleDepthExceeded,
    /// See [`HarnessError::EmptyOutput`]
    EmptyOutput,
    /// See [`HarnessError::Timeout`]
    Timeout,
    /// See [`HarnessError::Io`]
    Io,
    /// See [`HarnessError::Builder`]
    BuilderException,
}

impl HarnessError {
    /// Create invalid argument error
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create not found error
    #[inline]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create IO error for path
    #[inline]
    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify the error
    ///
    /// Builder exceptions that carry a harness error (a nested lookup
    /// propagated with `?`) report the carried error's kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation { .. } | Self::Schema { .. } => ErrorKind::Validation,
            Self::ConcurrencyViolation => ErrorKind::ConcurrencyViolation,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::ScheduleDepthExceeded { .. } => ErrorKind::ScheduleDepthExceeded,
            Self::EmptyOutput(_) => ErrorKind::EmptyOutput,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io { .. } => ErrorKind::Io,
            Self::Shared(inner) => inner.kind(),
            Self::Builder(error) => {
                if let Some(inner) = error.downcast_ref::<HarnessError>() {
                    inner.kind()
                } else if let Some(inner) = error.downcast_ref::<Arc<HarnessError>>() {
                    inner.kind()
                } else {
                    ErrorKind::BuilderException
                }
            }
        }
    }

    /// Check if the error came from builder code rather than the harness
    #[inline]
    #[must_use]
    pub fn is_builder_exception(&self) -> bool {
        match self {
            Self::Builder(_) => true,
            Self::Shared(inner) => inner.is_builder_exception(),
            _ => false,
        }
    }
}

impl From<Arc<HarnessError>> for HarnessError {
    fn from(error: Arc<HarnessError>) -> Self {
        Self::Shared(error)
    }
}

/// Result alias used across the workspace
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_error_display() {
        let err = HarnessError::invalid_argument("Project name cannot be an empty string.");
        assert!(err.to_string().contains("invalid argument"));

        let err = HarnessError::Validation {
            builder: "echo".to_string(),
            errors: vec!["/a: \"x\" is not of type \"integer\"".to_string(), "/b: bad".to_string()],
        };
        assert!(err.to_string().contains("; /b: bad"));
    }

    #[test]
    fn builder_error_display_is_transparent() {
        let err = HarnessError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), ErrorKind::BuilderException);
        assert!(err.is_builder_exception());
    }

    #[test]
    fn kind_sees_through_builder_wrapping() {
        let nested = HarnessError::not_found("Project target does not exist.");
        let err = HarnessError::from(anyhow::Error::new(nested));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let shared = Arc::new(HarnessError::ConcurrencyViolation);
        let err = HarnessError::from(anyhow::Error::new(shared));
        assert_eq!(err.kind(), ErrorKind::ConcurrencyViolation);
    }

    #[test]
    fn shared_error_keeps_kind() {
        let err = HarnessError::from(Arc::new(HarnessError::Timeout { timeout_ms: 10 }));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.is_builder_exception());
    }
}
