//! CLI for pipeliner
//!
//! - `run`: Execute one or more pipeline files in order
//! - `validate`: Load and validate pipeline files without running them
//! - `completions`: Generate shell completions

pub mod completions;
pub mod run;
pub mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use pipeliner::EXIT_DEFINITION_ERROR;
use pipeliner::executor::shutdown;
use pipeliner::infrastructure::{Config, OutputFormat, init_logging};
use pipeliner::pipeline::PipelineError;
use pipeliner::resolver::{is_valid_environment_name, is_valid_property_key};
use std::path::PathBuf;

/// CLI arguments for pipeliner
#[derive(Parser, Debug)]
#[command(name = "pipeliner")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run pipeline files in order, stopping at the first failure
    Run {
        /// Pipeline files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Trace resolution, argv and IPC traffic
        #[arg(long)]
        trace: bool,
        /// Prefix console lines with a timestamp
        #[arg(long)]
        timestamps: bool,
        /// Console output format
        #[arg(long, value_enum)]
        output: Option<OutputArg>,
        /// Property overriding every `with` block, as KEY=VALUE
        #[arg(short = 'P', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
        /// Environment variable for every step, as NAME=VALUE
        #[arg(short = 'E', long = "env", value_parser = parse_environment)]
        environment: Vec<(String, String)>,
    },

    /// Validate pipeline files without running them
    Validate {
        /// Pipeline files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputArg {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

fn split_pair(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))
}

fn parse_property(value: &str) -> Result<(String, String), String> {
    let (key, value) = split_pair(value)?;
    if is_valid_property_key(&key) {
        Ok((key, value))
    } else {
        Err(format!("invalid property name '{key}'"))
    }
}

fn parse_environment(value: &str) -> Result<(String, String), String> {
    let (name, value) = split_pair(value)?;
    if is_valid_environment_name(&name) {
        Ok((name, value))
    } else {
        Err(format!("invalid environment variable name '{name}'"))
    }
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    <Args as clap::CommandFactory>::command()
}

/// Process exit code for an error that escaped [`run`]
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PipelineError>() {
        Some(e) if e.is_validation() => EXIT_DEFINITION_ERROR,
        _ => 1,
    }
}

/// Parse and execute CLI arguments, returning the process exit code
pub fn run() -> Result<u8> {
    let args = Args::parse();
    let mut config = Config::from_env();

    match args.command {
        Command::Run {
            files,
            trace,
            timestamps,
            output,
            properties,
            environment,
        } => {
            config.trace |= trace;
            config.timestamps |= timestamps;
            if let Some(output) = output {
                config.output = match output {
                    OutputArg::Text => OutputFormat::Text,
                    OutputArg::Json => OutputFormat::Json,
                };
            }
            init_logging(&config);
            if let Err(err) = shutdown::install() {
                tracing::warn!(error = %err, "termination signals will not stop child processes");
            }

            let options = run::RunOptions {
                files,
                properties: properties.into_iter().collect(),
                environment: environment.into_iter().collect(),
            };
            let exit_code = run::run_pipelines(&config, &options)?;
            Ok(u8::try_from(exit_code).unwrap_or(1))
        }
        Command::Validate { files } => {
            init_logging(&config);
            validate::validate_pipelines(&files)?;
            Ok(0)
        }
        Command::Completions { shell, output } => {
            use clap_complete::Shell;

            let shell_enum = match shell {
                ShellArg::Bash => Shell::Bash,
                ShellArg::Zsh => Shell::Zsh,
                ShellArg::Fish => Shell::Fish,
                ShellArg::PowerShell => Shell::PowerShell,
            };

            let completions = completions::generate_completions(shell_enum)?;

            if let Some(output_path) = output {
                completions::save_completions(&completions, &output_path)?;
            } else {
                println!("{completions}");
            }
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let args = Args::try_parse_from([
            "pipeliner", "run", "a.yaml", "b.yaml", "-P", "job.x=1", "-E", "TOKEN=a=b", "--trace",
        ])
        .unwrap();
        let Command::Run {
            files,
            properties,
            environment,
            trace,
            ..
        } = args.command
        else {
            panic!("expected run");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(properties, [("job.x".to_string(), "1".to_string())]);
        assert_eq!(environment, [("TOKEN".to_string(), "a=b".to_string())]);
        assert!(trace);
    }

    #[test]
    fn test_rejects_bad_pairs() {
        assert!(parse_property("no-equals").is_err());
        assert!(parse_property("1bad=x").is_err());
        assert!(parse_environment("A-B=x").is_err());
        assert!(Args::try_parse_from(["pipeliner", "run"]).is_err());
    }

    #[test]
    fn test_validation_errors_map_to_definition_exit_code() {
        let err = anyhow::Error::new(PipelineError::Load {
            path: "x".to_string(),
            reason: "y".to_string(),
        });
        assert_eq!(exit_code_for(&err), EXIT_DEFINITION_ERROR);
        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), 1);
    }
}
