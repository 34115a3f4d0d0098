//! Harness configuration

use architect_core::{DefaultsMode, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Project name used until [`crate::BuilderHarness::use_project`] is called
pub const DEFAULT_PROJECT_NAME: &str = "test";

/// Builder name given to the builder under test when no info is supplied
pub const DEFAULT_BUILDER_NAME: &str = "harness:builder-under-test";

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    /// Initial project name
    pub project_name: String,
    /// Initial project metadata
    pub project_metadata: JsonObject,
    /// Schema defaults applied during option validation
    pub defaults: DefaultsMode,
    /// Maximum nesting of scheduled targets
    pub max_schedule_depth: usize,
    /// Budget for [`crate::BuilderHarness::execute_with_cases`] in milliseconds
    pub default_case_timeout_ms: u64,
}

impl HarnessConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With project name
    #[inline]
    #[must_use]
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    /// With project metadata
    #[inline]
    #[must_use]
    pub fn with_project_metadata(mut self, metadata: JsonObject) -> Self {
        self.project_metadata = metadata;
        self
    }

    /// With defaults mode
    #[inline]
    #[must_use]
    pub fn with_defaults(mut self, defaults: DefaultsMode) -> Self {
        self.defaults = defaults;
        self
    }

    /// With max schedule depth
    #[inline]
    #[must_use]
    pub fn with_max_schedule_depth(mut self, depth: usize) -> Self {
        self.max_schedule_depth = depth;
        self
    }

    /// With case timeout
    #[inline]
    #[must_use]
    pub fn with_case_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_case_timeout_ms = timeout_ms;
        self
    }
}

/// Metadata of the default project
#[must_use]
pub fn default_project_metadata() -> JsonObject {
    match json!({
        "root": "",
        "sourceRoot": "src",
        "cli": { "cache": { "enabled": false } }
    }) {
        serde_json::Value::Object(metadata) => metadata,
        _ => JsonObject::new(),
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            project_metadata: default_project_metadata(),
            defaults: DefaultsMode::AllProperties,
            max_schedule_depth: 32,
            default_case_timeout_ms: 30_000,
        }
    }
}
