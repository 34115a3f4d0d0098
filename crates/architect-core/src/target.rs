//! Target identity
//!
//! Provides [`Target`], the `(project, target, configuration)` triple that
//! names a buildable unit, and [`ProjectRef`] for lookups that accept either
//! a target or a bare project name.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Identifies a buildable unit
///
/// String form is `project:target[:configuration]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Project name
    pub project: String,
    /// Target name within the project
    pub target: String,
    /// Named configuration overlaid on the base options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

impl Target {
    /// Create target without a configuration
    #[inline]
    #[must_use]
    pub fn new(project: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            target: target.into(),
            configuration: None,
        }
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.target)?;
        if let Some(configuration) = &self.configuration {
            write!(f, ":{configuration}")?;
        }
        Ok(())
    }
}

impl FromStr for Target {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let project = parts.next().unwrap_or_default();
        let target = parts.next().unwrap_or_default();
        if project.is_empty() || target.is_empty() {
            return Err(HarnessError::invalid_argument(format!(
                "invalid target string '{s}', expected 'project:target[:configuration]'"
            )));
        }

        let configuration = match parts.next() {
            Some("") => {
                return Err(HarnessError::invalid_argument(format!(
                    "invalid target string '{s}', configuration cannot be empty"
                )))
            }
            Some(configuration) => Some(configuration.to_string()),
            None => None,
        };

        Ok(Self {
            project: project.to_string(),
            target: target.to_string(),
            configuration,
        })
    }
}

/// Either a target or a project name
#[derive(Debug, Clone, Copy)]
pub enum ProjectRef<'a> {
    /// Bare project name
    Name(&'a str),
    /// Project of a target
    Target(&'a Target),
}

impl<'a> ProjectRef<'a> {
    /// Project name referenced
    #[inline]
    #[must_use]
    pub fn project(&self) -> &'a str {
        match self {
            Self::Name(name) => name,
            Self::Target(target) => &target.project,
        }
    }
}

impl<'a> From<&'a str> for ProjectRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a Target> for ProjectRef<'a> {
    fn from(target: &'a Target) -> Self {
        Self::Target(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn target_display() {
        assert_eq!(Target::new("app", "build").to_string(), "app:build");
        assert_eq!(
            Target::new("app", "build").with_configuration("production").to_string(),
            "app:build:production"
        );
    }

    #[test]
    fn target_from_str() {
        let target: Target = "app:build:development".parse().unwrap();
        assert_eq!(target.project, "app");
        assert_eq!(target.target, "build");
        assert_eq!(target.configuration.as_deref(), Some("development"));

        let target: Target = "app:serve".parse().unwrap();
        assert!(target.configuration.is_none());
    }

    #[test]
    fn target_from_str_rejects_partial() {
        for input in ["", "app", "app:", ":build", "app:build:"] {
            let err = input.parse::<Target>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "input: {input:?}");
        }
    }

    #[test]
    fn project_ref_resolves_name() {
        let target = Target::new("lib", "test");
        assert_eq!(ProjectRef::from(&target).project(), "lib");
        assert_eq!(ProjectRef::from("app").project(), "app");
    }
}
