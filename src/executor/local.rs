//! Local executor
//!
//! Validates a pipeline, builds its execution tree and walks it on the
//! host. Each call to `execute` gets a fresh [`RunContext`].

use super::context::RunContext;
use super::listener::ExecutionListener;
use super::traits::{PipelineExecutor, RunReport};
use super::tree::ExecutionNode;
use crate::infrastructure::{Config, ExtensionResolver};
use crate::pipeline::{DefinitionError, Pipeline, PipelineError, Status, Validate};
use crate::resolver::PropertyMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Local executor that runs commands on host system
#[derive(Clone, Default)]
pub struct LocalExecutor {
    config: Config,
    listener: Option<Arc<dyn ExecutionListener>>,
    extensions: Option<Arc<dyn ExtensionResolver>>,
    os_environment: Option<PropertyMap>,
    environment: PropertyMap,
    properties: PropertyMap,
    channel_directory: Option<PathBuf>,
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("config", &self.config)
            .field("environment", &self.environment)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl LocalExecutor {
    /// Creates a new local executor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the listener; defaults to the console
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the extension resolver; defaults to local files
    #[must_use]
    pub fn with_extension_resolver(mut self, extensions: Arc<dyn ExtensionResolver>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    /// Replaces the process environment snapshot
    #[must_use]
    pub fn with_os_environment(mut self, environment: PropertyMap) -> Self {
        self.os_environment = Some(environment);
        self
    }

    /// Adds an environment variable below every `env` block
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Adds a property that overrides every `with` block
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets where IPC channel files are created
    #[must_use]
    pub fn with_channel_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.channel_directory = Some(directory.into());
        self
    }

    fn context(&self) -> RunContext {
        let mut ctx = RunContext::new(self.config.clone())
            .with_environment(self.environment.clone())
            .with_properties(self.properties.clone());
        if let Some(listener) = &self.listener {
            ctx = ctx.with_listener(Arc::clone(listener));
        }
        if let Some(extensions) = &self.extensions {
            ctx = ctx.with_extension_resolver(Arc::clone(extensions));
        }
        if let Some(environment) = &self.os_environment {
            ctx = ctx.with_os_environment(environment.clone());
        }
        if let Some(directory) = &self.channel_directory {
            ctx = ctx.with_channel_directory(directory.clone());
        }
        ctx
    }
}

impl PipelineExecutor for LocalExecutor {
    fn execute(&self, pipeline: &Pipeline) -> Result<RunReport, PipelineError> {
        self.validate(pipeline)?;
        let mut tree = ExecutionNode::build(pipeline)?;
        let mut ctx = self.context();

        tracing::info!(
            pipeline = %pipeline,
            execution_id = %ctx.execution_id(),
            "Starting pipeline execution"
        );
        let started = Instant::now();
        let exit_code = tree.execute(&mut ctx);
        let elapsed = started.elapsed();

        let status = tree.status().unwrap_or(Status::Failure);
        tracing::info!(
            exit_code,
            status = %status.as_str(),
            duration_ms = elapsed.as_millis(),
            "Pipeline completed"
        );

        Ok(RunReport {
            exit_code,
            status,
            nodes: tree.report(),
            properties: ctx.into_properties(),
            elapsed,
        })
    }

    fn validate(&self, pipeline: &Pipeline) -> Result<(), DefinitionError> {
        pipeline.validate()
    }
}
