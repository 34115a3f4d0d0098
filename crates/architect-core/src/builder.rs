//! Builder registration types
//!
//! A builder is a function from `(options, context, extra arguments)` to a
//! [`BuilderOutputLike`]. [`BuilderHandler`] is the seam; the `*_builder`
//! constructors adapt plain closures.

use crate::context::BuilderContext;
use crate::output::{BuilderOutput, BuilderOutputLike};
use crate::JsonObject;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Option schema of a builder
///
/// JSON-schema document, or `true` to accept anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSchema(Value);

impl OptionSchema {
    /// Schema accepting any option bag
    #[inline]
    #[must_use]
    pub fn any() -> Self {
        Self(Value::Bool(true))
    }

    /// Schema from a JSON document
    #[inline]
    #[must_use]
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// Raw schema document
    #[inline]
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Check if this is the `true` schema
    #[inline]
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.0 == Value::Bool(true)
    }
}

impl Default for OptionSchema {
    fn default() -> Self {
        Self::any()
    }
}

impl From<Value> for OptionSchema {
    fn from(schema: Value) -> Self {
        Self(schema)
    }
}

/// Metadata describing a builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderInfo {
    /// Builder name, used to look up its schema
    pub builder_name: String,
    /// Free text description
    #[serde(default)]
    pub description: String,
    /// Option schema
    #[serde(default)]
    pub option_schema: OptionSchema,
}

impl BuilderInfo {
    /// Create info with an empty description and a permissive schema
    #[inline]
    #[must_use]
    pub fn new(builder_name: impl Into<String>) -> Self {
        Self {
            builder_name: builder_name.into(),
            description: String::new(),
            option_schema: OptionSchema::any(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With option schema
    #[inline]
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<OptionSchema>) -> Self {
        self.option_schema = schema.into();
        self
    }
}

/// Builder implementation
///
/// Returning `Err` models a builder that throws before producing output.
pub trait BuilderHandler: Send + Sync {
    /// Invoke the builder
    fn run(
        &self,
        options: JsonObject,
        context: Arc<dyn BuilderContext>,
        extra: Vec<Value>,
    ) -> anyhow::Result<BuilderOutputLike>;
}

impl<F> BuilderHandler for F
where
    F: Fn(JsonObject, Arc<dyn BuilderContext>, Vec<Value>) -> anyhow::Result<BuilderOutputLike>
        + Send
        + Sync,
{
    fn run(
        &self,
        options: JsonObject,
        context: Arc<dyn BuilderContext>,
        extra: Vec<Value>,
    ) -> anyhow::Result<BuilderOutputLike> {
        self(options, context, extra)
    }
}

/// Shared handle to a builder implementation
pub type SharedHandler = Arc<dyn BuilderHandler>;

/// Adapt a closure with the full builder signature
pub fn builder_fn<F>(f: F) -> SharedHandler
where
    F: Fn(JsonObject, Arc<dyn BuilderContext>, Vec<Value>) -> anyhow::Result<BuilderOutputLike>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Adapt an async closure producing a single output
pub fn async_builder<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(JsonObject, Arc<dyn BuilderContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<BuilderOutput>> + Send + 'static,
{
    builder_fn(move |options, context, _extra| Ok(BuilderOutputLike::future(f(options, context))))
}

/// Adapt a closure producing a stream of outputs
pub fn stream_builder<F, S>(f: F) -> SharedHandler
where
    F: Fn(JsonObject, Arc<dyn BuilderContext>) -> S + Send + Sync + 'static,
    S: Stream<Item = anyhow::Result<BuilderOutput>> + Send + 'static,
{
    builder_fn(move |options, context, _extra| Ok(BuilderOutputLike::stream(f(options, context))))
}
