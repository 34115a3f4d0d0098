//! Builder output and its normalization
//!
//! Builders may answer with a ready value, a future, or a stream of values.
//! [`BuilderOutputLike::into_stream`] maps all three shapes onto one
//! [`OutputStream`] so consumers never inspect the shape again.

use crate::error::HarnessError;
use crate::JsonObject;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use futures::{FutureExt, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Result reported by a builder
///
/// `success == false` is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderOutput {
    /// Whether the build succeeded
    pub success: bool,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Builder specific fields
    #[serde(flatten)]
    pub fields: JsonObject,
}

impl BuilderOutput {
    /// Successful output
    #[inline]
    #[must_use]
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
            fields: JsonObject::new(),
        }
    }

    /// Failed output
    #[inline]
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            fields: JsonObject::new(),
        }
    }

    /// With an extra field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Extra field by key
    #[inline]
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Normalized builder output: fallible values in emission order
pub type OutputStream = BoxStream<'static, Result<BuilderOutput, HarnessError>>;

/// Any of the shapes a builder may return
pub enum BuilderOutputLike {
    /// Value available immediately
    Ready(BuilderOutput),
    /// Single value produced later
    Future(BoxFuture<'static, anyhow::Result<BuilderOutput>>),
    /// Values produced over time (watch mode)
    Stream(BoxStream<'static, anyhow::Result<BuilderOutput>>),
}

impl BuilderOutputLike {
    /// Wrap a future
    #[inline]
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<BuilderOutput>> + Send + 'static,
    {
        Self::Future(future.boxed())
    }

    /// Wrap a stream
    #[inline]
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<BuilderOutput>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Normalize into a stream
    #[must_use]
    pub fn into_stream(self) -> OutputStream {
        match self {
            Self::Ready(output) => stream::iter([Ok(output)]).boxed(),
            Self::Future(future) => {
                stream::once(future.map(|result| result.map_err(HarnessError::from))).boxed()
            }
            Self::Stream(values) => values
                .map(|result| result.map_err(HarnessError::from))
                .boxed(),
        }
    }
}

impl From<BuilderOutput> for BuilderOutputLike {
    fn from(output: BuilderOutput) -> Self {
        Self::Ready(output)
    }
}

impl fmt::Debug for BuilderOutputLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(output) => f.debug_tuple("Ready").field(output).finish(),
            Self::Future(_) => f.write_str("Future(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}
