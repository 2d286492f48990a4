//! pipeliner - run YAML pipelines locally
//!
//! ## Commands
//!
//! - `pipeliner run` - Execute pipeline files in order
//! - `pipeliner validate` - Check pipeline files without running them
//! - `pipeliner completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a pipeline with an override
//! pipeliner run pipeline.yaml -P version=1.2.3
//!
//! # Machine-readable events
//! pipeliner run pipeline.yaml --output json
//!
//! # Validate only
//! pipeliner validate pipeline.yaml
//!
//! # Generate shell completions
//! pipeliner completions bash > /etc/bash_completion.d/pipeliner
//! ```
//!
//! ## Exit codes
//!
//! - `0` every pipeline succeeded
//! - `65` a pipeline file failed to load or validate; nothing ran
//! - `130` interrupted by SIGINT, SIGTERM or SIGHUP
//! - otherwise the exit code of the first failing pipeline

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(cli::exit_code_for(&e))
        }
    }
}
