//! # Pipeliner - A local pipeline execution engine
//!
//! Pipeliner runs YAML-defined pipelines on the local machine. A pipeline
//! is a tree of jobs and steps; each step runs command lines through a
//! shell, one child process per line, in strict sequence.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipeliner::prelude::*;
//!
//! let pipeline = parse_pipeline(r"
//! pipeline:
//!   with:
//!     greeting: hello
//!   jobs:
//!     - steps:
//!         - run: |
//!             echo ${{ greeting }} > $message
//!             echo ${{ message }} world
//! ").unwrap();
//!
//! let report = LocalExecutor::new().execute(&pipeline).unwrap();
//! assert_eq!(report.exit_code, 0);
//! ```
//!
//! ## Features
//!
//! - **Scoped substitution**: `${{ name }}` properties resolved through
//!   pipeline, job and step scopes, `$NAME` environment variables
//! - **Output capture**: `cmd > $VAR` and `cmd >> $VAR` store output as
//!   properties for later steps
//! - **Short-circuit**: the first failure skips the rest of its branch,
//!   with a status event for every node that did not run
//! - **Timeouts**: runaway commands are killed with their process group
//! - **Extensions**: `--extension <url> [checksum]` runs a script bundle
//!   that exchanges properties with the engine through IPC files

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod infrastructure;
pub mod pipeline;
pub mod resolver;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{
    ConsoleListener, ExecutionEvent, ExecutionListener, LocalExecutor, PipelineExecutor,
    RecordingListener, RunContext, RunReport,
};
pub use infrastructure::{Config, ExtensionResolver, LocalExtensionResolver};
pub use pipeline::{
    Job, Pipeline, PipelineBuilder, PipelineError, Status, Step, Validate, load_pipeline,
    parse_pipeline,
};
pub use resolver::{Parser, PropertyMap, Resolver};

/// Version of the pipeliner crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process exit code for definition, syntax and load errors
pub const EXIT_DEFINITION_ERROR: u8 = 65;
