//! Pipeline execution traits
//!
//! This module defines the executor interface and the report a run
//! produces.

use super::tree::NodeReport;
use crate::pipeline::{DefinitionError, Pipeline, PipelineError, Status};
use crate::resolver::PropertyMap;
use serde::Serialize;
use std::time::Duration;

/// Trait for executing pipelines
pub trait PipelineExecutor: Send + Sync {
    /// Validates and executes a pipeline
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] only for validation-class failures; a
    /// failing step is reported through the [`RunReport`].
    fn execute(&self, pipeline: &Pipeline) -> Result<RunReport, PipelineError>;

    /// Validates a pipeline without executing it
    ///
    /// # Errors
    ///
    /// Returns the first [`DefinitionError`] found.
    fn validate(&self, pipeline: &Pipeline) -> Result<(), DefinitionError>;
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Pipeline exit code
    pub exit_code: i32,
    /// Pipeline status
    pub status: Status,
    /// Every node, depth-first
    pub nodes: Vec<NodeReport>,
    /// Run-time properties at the end of the run
    #[serde(skip)]
    pub properties: PropertyMap,
    /// Wall time
    pub elapsed: Duration,
}

impl RunReport {
    /// Returns true if the pipeline succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Node at `location`, e.g. `pipeline.jobs[0].steps[2]`
    #[must_use]
    pub fn node(&self, location: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node.location == location)
    }

    /// Node with `id`
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node.id.as_deref() == Some(id))
    }

    /// Run-time property `key`
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}
