//! Attributes shared by pipelines, jobs and steps

use super::definition::{optional_scalar, scalar_map};
use super::errors::DefinitionError;
use crate::resolver::{is_valid_environment_name, is_valid_id, is_valid_property_name, parse};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Timeout applied to a step that does not set one
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 360;

/// Smallest accepted `timeout-minutes`
pub const MIN_TIMEOUT_MINUTES: u64 = 1;

/// Largest accepted `timeout-minutes` (three days)
pub const MAX_TIMEOUT_MINUTES: u64 = 4320;

/// Decodes an `enabled` value: case-insensitive `true` or `false`
#[must_use]
pub fn decode_enabled(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Fields every node carries
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeAttributes {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Id, unique across the pipeline
    #[serde(default)]
    pub id: Option<String>,

    /// Raw `enabled` value, decoded during validation
    #[serde(default, deserialize_with = "optional_scalar")]
    pub enabled: Option<String>,

    /// Working directory, may contain references
    #[serde(default)]
    pub working_directory: Option<String>,

    /// Timeout in minutes
    #[serde(default)]
    pub timeout_minutes: Option<u64>,

    /// `env` block
    #[serde(default, rename = "env", deserialize_with = "scalar_map")]
    pub environment: BTreeMap<String, String>,

    /// `with` block
    #[serde(default, rename = "with", deserialize_with = "scalar_map")]
    pub properties: BTreeMap<String, String>,
}

impl NodeAttributes {
    /// Decoded `enabled`; absent means enabled, invalid means `None`
    #[must_use]
    pub fn is_enabled(&self) -> Option<bool> {
        self.enabled.as_deref().map_or(Some(true), decode_enabled)
    }

    /// `name` if set, otherwise `id`
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.name.as_deref().or(self.id.as_deref())
    }

    /// Checks the attribute grammar at `location`
    ///
    /// # Errors
    ///
    /// Returns the first [`DefinitionError`] found.
    pub fn validate_at(&self, location: &str) -> Result<(), DefinitionError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(DefinitionError::EmptyName {
                location: location.to_string(),
            });
        }

        if let Some(id) = &self.id
            && !is_valid_id(id)
        {
            return Err(DefinitionError::InvalidId {
                location: location.to_string(),
                id: id.clone(),
            });
        }

        if self.is_enabled().is_none() {
            return Err(DefinitionError::InvalidEnabled {
                location: location.to_string(),
                value: self.enabled.clone().unwrap_or_default(),
            });
        }

        if let Some(minutes) = self.timeout_minutes
            && !(MIN_TIMEOUT_MINUTES..=MAX_TIMEOUT_MINUTES).contains(&minutes)
        {
            return Err(DefinitionError::InvalidTimeout {
                location: location.to_string(),
                value: minutes,
            });
        }

        for (name, value) in &self.environment {
            if !is_valid_environment_name(name) {
                return Err(DefinitionError::InvalidEnvironmentName {
                    location: location.to_string(),
                    name: name.clone(),
                });
            }
            check_syntax(value, &format!("{location}.env.{name}"))?;
        }

        for (name, value) in &self.properties {
            if !is_valid_property_name(name) {
                return Err(DefinitionError::InvalidPropertyName {
                    location: location.to_string(),
                    name: name.clone(),
                });
            }
            check_syntax(value, &format!("{location}.with.{name}"))?;
        }

        if let Some(directory) = &self.working_directory {
            check_syntax(directory, &format!("{location}.working-directory"))?;
        }

        Ok(())
    }
}

/// Fails if `value` does not tokenize
pub(crate) fn check_syntax(value: &str, location: &str) -> Result<(), DefinitionError> {
    parse(value)
        .map(|_| ())
        .map_err(|source| DefinitionError::Syntax {
            location: location.to_string(),
            source,
        })
}

/// Setters for the shared attributes, generated on each builder
macro_rules! attribute_setters {
    ($builder:ty, $field:ident) => {
        impl $builder {
            /// Sets the display name
            pub fn name(mut self, name: impl Into<String>) -> Self {
                self.$field.attributes.name = Some(name.into());
                self
            }

            /// Sets the id
            pub fn id(mut self, id: impl Into<String>) -> Self {
                self.$field.attributes.id = Some(id.into());
                self
            }

            /// Sets the raw `enabled` value
            pub fn enabled(mut self, enabled: impl Into<String>) -> Self {
                self.$field.attributes.enabled = Some(enabled.into());
                self
            }

            /// Sets the working directory
            pub fn working_directory(mut self, directory: impl Into<String>) -> Self {
                self.$field.attributes.working_directory = Some(directory.into());
                self
            }

            /// Sets the timeout in minutes
            pub fn timeout_minutes(mut self, minutes: u64) -> Self {
                self.$field.attributes.timeout_minutes = Some(minutes);
                self
            }

            /// Adds an environment variable
            pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                self.$field
                    .attributes
                    .environment
                    .insert(key.into(), value.into());
                self
            }

            /// Adds a property
            pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                self.$field
                    .attributes
                    .properties
                    .insert(key.into(), value.into());
                self
            }
        }
    };
}

pub(crate) use attribute_setters;
