//! `pipeliner run` - Execute pipeline files
//!
//! Every file is loaded and validated before the first one runs, so a
//! definition error in the last file aborts the whole invocation without
//! side effects. Pipelines then run in order; the first non-zero exit code
//! stops the sequence and becomes the process exit code. A termination
//! signal kills the running command and exits with status 130.
//!
//! ## Usage
//!
//! ```bash
//! pipeliner run build.yaml deploy.yaml -P version=1.2.3 -E CI=true
//! ```

use anyhow::Result;
use pipeliner::executor::{
    CompositeListener, ConsoleListener, EXIT_CANCELLED, ExecutionListener, LocalExecutor,
    PipelineExecutor, TracingListener, shutdown,
};
use pipeliner::infrastructure::Config;
use pipeliner::pipeline::{Pipeline, PipelineError, Validate, load_pipeline};
use pipeliner::resolver::PropertyMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options for one `run` invocation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Pipeline files, run in order
    pub files: Vec<PathBuf>,
    /// `-P` overrides
    pub properties: PropertyMap,
    /// `-E` variables
    pub environment: PropertyMap,
}

/// Loads and validates a pipeline file
///
/// # Errors
///
/// Returns a validation-class [`PipelineError`].
pub fn load_valid_pipeline(file: &Path) -> Result<Pipeline, PipelineError> {
    let pipeline = load_pipeline(file)?;
    pipeline.validate()?;
    Ok(pipeline)
}

fn listener(config: &Config) -> Arc<dyn ExecutionListener> {
    let console: Arc<dyn ExecutionListener> =
        Arc::new(ConsoleListener::stdout(config.output, config.timestamps));
    if !config.trace {
        return console;
    }
    let mut composite = CompositeListener::new();
    composite.add(console);
    composite.add(Arc::new(TracingListener));
    Arc::new(composite)
}

/// Runs every pipeline in `options`, returning the first non-zero exit code
///
/// # Errors
///
/// Returns the first validation-class error; nothing has run by then.
pub fn run_pipelines(config: &Config, options: &RunOptions) -> Result<i32> {
    let pipelines = options
        .files
        .iter()
        .map(PathBuf::as_path)
        .map(load_valid_pipeline)
        .collect::<Result<Vec<_>, _>>()?;

    let mut executor = LocalExecutor::new()
        .with_config(config.clone())
        .with_listener(listener(config));
    for (key, value) in &options.properties {
        executor = executor.with_property(key.clone(), value.clone());
    }
    for (name, value) in &options.environment {
        executor = executor.with_env(name.clone(), value.clone());
    }

    for (file, pipeline) in options.files.iter().zip(&pipelines) {
        tracing::debug!(file = %file.display(), "Running pipeline");
        let report = executor.execute(pipeline)?;
        if shutdown::is_cancelled() {
            return Ok(i32::from(EXIT_CANCELLED));
        }
        if report.exit_code != 0 {
            tracing::debug!(file = %file.display(), exit_code = report.exit_code, "Pipeline failed");
            return Ok(report.exit_code);
        }
    }

    Ok(0)
}
