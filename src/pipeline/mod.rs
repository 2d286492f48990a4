//! Pipeline domain types and logic
//!
//! The static model is a three-level tree: a [`Pipeline`] owns [`Job`]s,
//! a job owns [`Step`]s, and a step owns command lines. All three share
//! [`NodeAttributes`].

pub mod definition;
pub mod errors;
pub mod node;
pub mod pipeline_def;
pub mod steps;
pub mod types;


pub use definition::{load_pipeline, parse_pipeline};
pub use errors::{
    DefinitionError, ExecutionError, ExtensionError, IpcError, PipelineError, ReferenceKind,
    SyntaxError,
};
pub use node::{
    DEFAULT_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES, MIN_TIMEOUT_MINUTES, NodeAttributes,
    decode_enabled,
};
pub use pipeline_def::{
    Job, JobBuilder, PIPELINE_LOCATION, Pipeline, PipelineBuilder, job_location, step_location,
};
pub use steps::{Run, RunKind, ShellKind, Step, StepBuilder, parse_run_block};
pub use types::{CaptureType, NodeKind, Status, Validate};
