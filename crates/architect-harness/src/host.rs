//! Virtual workspace host
//!
//! [`ContextHost`] answers the workspace questions a builder context asks:
//! which builder runs a target, what options and metadata it has, and how
//! to validate options for a builder. [`HarnessHost`] answers them from the
//! harness [`Registry`].

use architect_core::{
    BuilderInfo, HarnessError, JsonObject, OptionSchema, Result, SchemaValidator, SharedHandler,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Auxiliary target registered on the harness
#[derive(Clone)]
pub struct BuilderRegistration {
    /// Builder implementation
    pub handler: SharedHandler,
    /// Builder info
    pub info: BuilderInfo,
    /// Target options
    pub options: JsonObject,
}

impl fmt::Debug for BuilderRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderRegistration")
            .field("info", &self.info)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Everything the harness has been told about its workspace
pub struct Registry {
    /// Active project name
    pub project_name: String,
    /// Active project metadata
    pub project_metadata: JsonObject,
    /// Builder under test
    pub builder: SharedHandler,
    /// Info of the builder under test
    pub builder_info: BuilderInfo,
    /// Primary target name, once declared
    pub target_name: Option<String>,
    /// Primary target options keyed by configuration (`None` is the base)
    pub options: HashMap<Option<String>, JsonObject>,
    /// Auxiliary targets in registration order
    pub builder_targets: IndexMap<String, BuilderRegistration>,
}

impl Registry {
    /// Base options overlaid with a configuration's options
    #[must_use]
    pub fn merged_options(&self, configuration: Option<&str>) -> JsonObject {
        let mut merged = self.options.get(&None).cloned().unwrap_or_default();
        if let Some(configuration) = configuration {
            if let Some(overlay) = self.options.get(&Some(configuration.to_string())) {
                merged.extend(overlay.clone());
            }
        }
        merged
    }

    fn check_project(&self, project: &str) -> Result<()> {
        if project == self.project_name {
            Ok(())
        } else {
            Err(HarnessError::not_found(format!(
                "Project \"{project}\" does not exist."
            )))
        }
    }

    fn is_primary(&self, target: &str) -> bool {
        self.target_name.as_deref() == Some(target)
    }

    fn schema_for(&self, builder_name: &str) -> OptionSchema {
        if builder_name == self.builder_info.builder_name {
            return self.builder_info.option_schema.clone();
        }
        self.builder_targets
            .values()
            .find(|registration| registration.info.builder_name == builder_name)
            .map(|registration| registration.info.option_schema.clone())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("project_name", &self.project_name)
            .field("builder", &self.builder_info.builder_name)
            .field("target_name", &self.target_name)
            .field("builder_targets", &self.builder_targets.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Workspace lookups used by builder contexts
#[async_trait]
pub trait ContextHost: Send + Sync {
    /// Builder info and implementation for a target
    async fn find_builder_by_target(
        &self,
        project: &str,
        target: &str,
    ) -> Result<(BuilderInfo, SharedHandler)>;

    /// Builder name for a target
    async fn get_builder_name(&self, project: &str, target: &str) -> Result<String>;

    /// Project metadata
    async fn get_metadata(&self, project: &str) -> Result<JsonObject>;

    /// Target options with a configuration applied
    async fn get_options(
        &self,
        project: &str,
        target: &str,
        configuration: Option<&str>,
    ) -> Result<JsonObject>;

    /// Check if a target exists
    async fn has_target(&self, project: &str, target: &str) -> Result<bool>;

    /// Configuration used when none is requested
    async fn get_default_configuration_name(
        &self,
        project: &str,
        target: &str,
    ) -> Result<Option<String>>;

    /// Validate options for a builder
    async fn validate(&self, options: JsonObject, builder_name: &str) -> Result<JsonObject>;
}

/// [`ContextHost`] over the harness registry
#[derive(Clone)]
pub struct HarnessHost {
    registry: Arc<RwLock<Registry>>,
    validator: Arc<dyn SchemaValidator>,
}

impl HarnessHost {
    /// Create host
    #[must_use]
    pub fn new(registry: Arc<RwLock<Registry>>, validator: Arc<dyn SchemaValidator>) -> Self {
        Self {
            registry,
            validator,
        }
    }
}

impl fmt::Debug for HarnessHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessHost")
            .field("registry", &*self.registry.read())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContextHost for HarnessHost {
    async fn find_builder_by_target(
        &self,
        project: &str,
        target: &str,
    ) -> Result<(BuilderInfo, SharedHandler)> {
        let registry = self.registry.read();
        registry.check_project(project)?;

        if registry.is_primary(target) {
            return Ok((registry.builder_info.clone(), Arc::clone(&registry.builder)));
        }
        match registry.builder_targets.get(target) {
            Some(registration) => Ok((registration.info.clone(), Arc::clone(&registration.handler))),
            None => Err(HarnessError::not_found(format!(
                "Project target \"{project}:{target}\" does not exist."
            ))),
        }
    }

    async fn get_builder_name(&self, project: &str, target: &str) -> Result<String> {
        let (info, _) = self.find_builder_by_target(project, target).await?;
        Ok(info.builder_name)
    }

    async fn get_metadata(&self, project: &str) -> Result<JsonObject> {
        let registry = self.registry.read();
        registry.check_project(project)?;
        Ok(registry.project_metadata.clone())
    }

    async fn get_options(
        &self,
        project: &str,
        target: &str,
        configuration: Option<&str>,
    ) -> Result<JsonObject> {
        let registry = self.registry.read();
        registry.check_project(project)?;

        if registry.is_primary(target) {
            return Ok(registry.merged_options(configuration));
        }
        let Some(registration) = registry.builder_targets.get(target) else {
            return Err(HarnessError::not_found(format!(
                "Project target \"{project}:{target}\" does not exist."
            )));
        };
        // Auxiliary targets have no configurations
        if configuration.is_some() {
            return Ok(JsonObject::new());
        }
        Ok(registration.options.clone())
    }

    async fn has_target(&self, project: &str, target: &str) -> Result<bool> {
        let registry = self.registry.read();
        registry.check_project(project)?;
        Ok(registry.is_primary(target) || registry.builder_targets.contains_key(target))
    }

    async fn get_default_configuration_name(
        &self,
        _project: &str,
        _target: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn validate(&self, options: JsonObject, builder_name: &str) -> Result<JsonObject> {
        let schema = self.registry.read().schema_for(builder_name);
        self.validator.validate(builder_name, &schema, options)
    }
}
