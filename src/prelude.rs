//! Prelude module for common imports

// Re-export all pipeline types
pub use crate::pipeline::errors::{DefinitionError, ExecutionError, PipelineError, SyntaxError};
pub use crate::pipeline::pipeline_def::{Job, JobBuilder, Pipeline, PipelineBuilder};
pub use crate::pipeline::steps::{Step, StepBuilder};
pub use crate::pipeline::types::{NodeKind, Status, Validate};
pub use crate::pipeline::{load_pipeline, parse_pipeline};

// Re-export resolver types
pub use crate::resolver::{Parser, PropertyMap, Resolver, Substitution};

// Re-export executor types
pub use crate::executor::{
    ExecutionEvent, ExecutionListener, LocalExecutor, PipelineExecutor, RecordingListener,
    RunReport,
};
pub use crate::infrastructure::Config;
