//! Run-line execution
//!
//! Each run line of a step is resolved against the step's scope right
//! before it executes, so values captured by earlier lines are visible to
//! later ones.

use super::capture::{apply_capture, import_properties};
use super::context::RunContext;
use super::ipc::IpcChannel;
use super::listener::{ExecutionEvent, NodeInfo};
use super::shell::{ProcessRequest, command_arguments};
use super::tree::Frame;
use crate::infrastructure::parse_extension_arguments;
use crate::pipeline::{CaptureType, ExecutionError, Run, RunKind, ShellKind};
use crate::resolver::{
    PropertyMap, Resolver, ScopePath, Substitution, merge_environment, merge_properties,
};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_WORKING_DIRECTORY: &str = ".";

/// What one run line sees
#[derive(Debug, Clone)]
pub(crate) struct StepScope {
    path: ScopePath,
    properties: PropertyMap,
    environment: PropertyMap,
    working_directory: PathBuf,
}

impl StepScope {
    /// Merges the frame's layers with the run-time state in `ctx`
    pub(crate) fn resolve(ctx: &RunContext, frame: &Frame<'_>) -> Result<Self, ExecutionError> {
        let layers = frame.layers();
        let path = frame.path().clone();
        let properties = merge_properties(&layers, ctx.properties());
        let environment = merge_environment(
            &ctx.base_environment(),
            &layers,
            ctx.parser(),
            &properties,
            &path,
        )?;

        let directory = frame
            .working_directory()
            .unwrap_or(DEFAULT_WORKING_DIRECTORY);
        let working_directory = Resolver::new(ctx.parser(), &properties, &environment)
            .scoped(&path)
            .resolve_all(directory)?;

        Ok(Self {
            path,
            properties,
            environment,
            working_directory: PathBuf::from(working_directory),
        })
    }

    fn resolver<'s>(&'s self, ctx: &'s RunContext, substitution: Substitution) -> Resolver<'s> {
        Resolver::new(ctx.parser(), &self.properties, &self.environment)
            .scoped(&self.path)
            .substitution(substitution)
    }

    /// Current value of `name` as the step sees it
    fn lookup(&self, name: &str) -> Option<&str> {
        self.path
            .aliases(name)
            .iter()
            .find_map(|key| self.properties.get(key))
            .map(String::as_str)
    }

    /// Properties handed to the command, values resolved where possible
    fn outbound(&self, ctx: &RunContext) -> PropertyMap {
        let resolver = self.resolver(ctx, Substitution::All);
        self.properties
            .iter()
            .map(|(key, value)| {
                let resolved = resolver.resolve_all(value).unwrap_or_else(|e| {
                    tracing::trace!(key = %key, error = %e, "passing unresolved property");
                    value.clone()
                });
                (key.clone(), resolved)
            })
            .collect()
    }
}

/// Executes one run line, returning its exit code
///
/// # Errors
///
/// Returns any [`ExecutionError`] raised while resolving or running the
/// line; the caller turns it into a failed step.
pub(crate) fn execute_run(
    ctx: &mut RunContext,
    frame: &Frame<'_>,
    node: &NodeInfo,
    shell: ShellKind,
    run: &Run,
) -> Result<i32, ExecutionError> {
    let scope = StepScope::resolve(ctx, frame)?;
    match run.kind {
        RunKind::Print => print(ctx, node, run, &scope),
        RunKind::Command => command(ctx, frame, node, shell, run, &scope),
        RunKind::Extension => extension(ctx, frame, node, run, &scope),
    }
}

fn print(
    ctx: &mut RunContext,
    node: &NodeInfo,
    run: &Run,
    scope: &StepScope,
) -> Result<i32, ExecutionError> {
    let message = scope.resolver(ctx, Substitution::All).resolve_all(&run.command)?;
    if run.capture_type == CaptureType::None {
        ctx.emit(&ExecutionEvent::Output {
            node: node.clone(),
            line: message,
        });
    } else {
        store_capture(ctx, scope, run, &message);
    }
    Ok(0)
}

fn command(
    ctx: &mut RunContext,
    frame: &Frame<'_>,
    node: &NodeInfo,
    shell: ShellKind,
    run: &Run,
    scope: &StepScope,
) -> Result<i32, ExecutionError> {
    // `$NAME` is left for the shell to expand.
    let command = scope
        .resolver(ctx, Substitution::PropertiesOnly)
        .resolve_all(&run.command)?;
    ctx.emit(&ExecutionEvent::Command {
        node: node.clone(),
        command: command.clone(),
    });

    let argv = command_arguments(shell, &command)?;
    spawn(ctx, frame, node, run, scope, &argv, &scope.working_directory)
}

fn extension(
    ctx: &mut RunContext,
    frame: &Frame<'_>,
    node: &NodeInfo,
    run: &Run,
    scope: &StepScope,
) -> Result<i32, ExecutionError> {
    let arguments = scope.resolver(ctx, Substitution::All).resolve_all(&run.command)?;
    let (url, checksum) = parse_extension_arguments(&arguments)?;
    ctx.emit(&ExecutionEvent::Command {
        node: node.clone(),
        command: format!("--extension {arguments}"),
    });

    let script = ctx
        .extensions()
        .resolve(&url, checksum.as_ref(), &scope.working_directory)?;
    let script = fs::canonicalize(&script)?;
    let directory = script
        .parent()
        .map_or_else(|| scope.working_directory.clone(), Path::to_path_buf);
    tracing::debug!(url = %url, script = %script.display(), "running extension");

    let argv = vec!["bash".to_string(), script.display().to_string()];
    spawn(ctx, frame, node, run, scope, &argv, &directory)
}

fn spawn(
    ctx: &mut RunContext,
    frame: &Frame<'_>,
    node: &NodeInfo,
    run: &Run,
    scope: &StepScope,
    argv: &[String],
    working_directory: &Path,
) -> Result<i32, ExecutionError> {
    let channel = IpcChannel::open(ctx.channel_directory(), ctx.channels())?;
    channel.outbound.write(&scope.outbound(ctx))?;

    let mut environment = scope.environment.clone();
    environment.extend(channel.environment());

    let request = ProcessRequest {
        argv,
        environment: &environment,
        working_directory,
        capture: run.capture_type != CaptureType::None,
        deadline: frame.deadline(),
    };

    let outcome = {
        let ctx = &*ctx;
        ctx.processes().run(&request, &mut |line| {
            ctx.emit(&ExecutionEvent::Output {
                node: node.clone(),
                line: line.to_string(),
            });
        })?
    };

    if outcome.exit_code != 0 {
        // Captured output would otherwise be lost.
        for line in outcome.captured.iter().flat_map(|c| c.lines()) {
            ctx.emit(&ExecutionEvent::Output {
                node: node.clone(),
                line: line.to_string(),
            });
        }
        return Ok(outcome.exit_code);
    }

    if let Some(captured) = &outcome.captured {
        store_capture(ctx, scope, run, captured);
    }
    let imported = channel.inbound.read()?;
    if !imported.is_empty() {
        tracing::debug!(entries = imported.len(), "importing properties from IPC channel");
    }
    import_properties(ctx.properties_mut(), &scope.path, imported);
    Ok(0)
}

fn store_capture(ctx: &mut RunContext, scope: &StepScope, run: &Run, captured: &str) {
    if let Some(variable) = &run.capture_variable {
        apply_capture(
            ctx.properties_mut(),
            &scope.path,
            run.capture_type,
            variable,
            scope.lookup(variable),
            captured,
        );
    }
}
