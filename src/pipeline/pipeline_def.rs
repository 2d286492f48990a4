//! Pipeline and job definitions and builders

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::errors::DefinitionError;
use super::node::{NodeAttributes, attribute_setters};
use super::steps::Step;
use super::types::Validate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Root of a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Pipeline {
    /// Shared attributes
    #[serde(flatten)]
    pub attributes: NodeAttributes,

    /// Jobs, run in order
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// A job: shared attributes and an ordered list of steps
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Job {
    /// Shared attributes
    #[serde(flatten)]
    pub attributes: NodeAttributes,

    /// Steps, run in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Location of the pipeline root in error messages
pub const PIPELINE_LOCATION: &str = "pipeline";

/// Location of job `index`
pub fn job_location(index: usize) -> String {
    format!("{PIPELINE_LOCATION}.jobs[{index}]")
}

/// Location of step `step` in job `job`
pub fn step_location(job: usize, step: usize) -> String {
    format!("{}.steps[{step}]", job_location(job))
}

#[derive(Default)]
struct IdRegistry {
    seen: HashMap<String, String>,
}

impl IdRegistry {
    fn register(
        &mut self,
        attributes: &NodeAttributes,
        location: &str,
    ) -> Result<(), DefinitionError> {
        let Some(id) = &attributes.id else {
            return Ok(());
        };
        if let Some(first) = self.seen.get(id) {
            return Err(DefinitionError::DuplicateId {
                location: location.to_string(),
                id: id.clone(),
                first: first.clone(),
            });
        }
        self.seen.insert(id.clone(), location.to_string());
        Ok(())
    }
}

impl Validate for Pipeline {
    type Error = DefinitionError;

    fn validate(&self) -> Result<(), Self::Error> {
        let mut ids = IdRegistry::default();

        self.attributes.validate_at(PIPELINE_LOCATION)?;
        ids.register(&self.attributes, PIPELINE_LOCATION)?;

        if self.jobs.is_empty() {
            return Err(DefinitionError::EmptyPipeline {
                location: PIPELINE_LOCATION.to_string(),
            });
        }

        for (j, job) in self.jobs.iter().enumerate() {
            let location = job_location(j);
            job.attributes.validate_at(&location)?;
            ids.register(&job.attributes, &location)?;

            if job.steps.is_empty() {
                return Err(DefinitionError::EmptyJob { location });
            }

            for (s, step) in job.steps.iter().enumerate() {
                let location = step_location(j, s);
                step.validate_at(&location)?;
                ids.register(&step.attributes, &location)?;
            }
        }

        Ok(())
    }
}

impl Pipeline {
    /// Creates a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Returns pipeline name
    pub fn name(&self) -> Option<&str> {
        self.attributes.name.as_deref()
    }

    /// Returns number of jobs
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Returns number of steps across all jobs
    pub fn step_count(&self) -> usize {
        self.jobs.iter().map(|job| job.steps.len()).sum()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline({}): {} jobs, {} steps",
            self.attributes.label().unwrap_or("unnamed"),
            self.jobs.len(),
            self.step_count()
        )
    }
}

impl Job {
    /// Creates a new job builder
    pub fn builder() -> JobBuilder {
        JobBuilder::new()
    }
}

/// Builder for creating pipelines
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job to pipeline
    pub fn job(mut self, job: Job) -> Self {
        self.pipeline.jobs.push(job);
        self
    }

    /// Builds the pipeline, validating it
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if validation fails.
    pub fn build(self) -> Result<Pipeline, DefinitionError> {
        self.pipeline.validate()?;
        Ok(self.pipeline)
    }

    /// Builds the pipeline without validation
    pub fn build_unchecked(self) -> Pipeline {
        self.pipeline
    }
}

attribute_setters!(PipelineBuilder, pipeline);

/// Builder for creating jobs
#[derive(Debug, Clone, Default)]
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    /// Creates a new job builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step to the job
    pub fn step(mut self, step: Step) -> Self {
        self.job.steps.push(step);
        self
    }

    /// Builds the job
    pub fn build(self) -> Job {
        self.job
    }
}

attribute_setters!(JobBuilder, job);
