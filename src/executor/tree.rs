//! Execution tree
//!
//! The runtime counterpart of a [`Pipeline`]: one [`ExecutionNode`] per
//! pipeline, job and step, each tracking status, exit code and elapsed
//! time. The tree is walked depth-first, left to right. Once a node fails
//! or is disabled, every later sibling and all of its descendants are
//! reported as skipped without running.

use super::context::RunContext;
use super::listener::{ExecutionEvent, NodeInfo};
use super::step::execute_run;
use super::timeout::Deadline;
use crate::pipeline::{
    DEFAULT_TIMEOUT_MINUTES, DefinitionError, NodeAttributes, NodeKind, PIPELINE_LOCATION,
    Pipeline, Run, ShellKind, Status, job_location, step_location,
};
use crate::resolver::{ScopeLayer, ScopePath};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Exit code recorded for a step whose run line raised an error
pub const EXECUTION_ERROR_EXIT_CODE: i32 = 1;

/// Scope inherited from the enclosing nodes
#[derive(Debug, Clone, Default)]
pub(crate) struct Frame<'a> {
    attributes: Vec<&'a NodeAttributes>,
    path: ScopePath,
    deadline: Option<Deadline>,
}

impl<'a> Frame<'a> {
    /// Frame for a node nested in this one
    ///
    /// Steps always get a deadline; pipelines and jobs only when they set
    /// `timeout-minutes` themselves. The earliest deadline wins.
    fn enter(&self, kind: NodeKind, attributes: &'a NodeAttributes) -> Self {
        let own = match (kind, attributes.timeout_minutes) {
            (NodeKind::Step, minutes) => {
                Deadline::after_minutes(minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES))
            }
            (_, Some(minutes)) => Deadline::after_minutes(minutes),
            (_, None) => None,
        };

        let mut frame = self.clone();
        frame.attributes.push(attributes);
        frame.path = self.path.child(attributes.id.as_deref());
        frame.deadline = Deadline::earliest(self.deadline, own);
        frame
    }

    pub(crate) fn layers(&self) -> Vec<ScopeLayer<'a>> {
        self.attributes
            .iter()
            .map(|a| ScopeLayer {
                id: a.id.as_deref(),
                properties: &a.properties,
                environment: &a.environment,
            })
            .collect()
    }

    pub(crate) fn path(&self) -> &ScopePath {
        &self.path
    }

    pub(crate) fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    /// Innermost `working-directory`, unresolved
    pub(crate) fn working_directory(&self) -> Option<&'a str> {
        self.attributes
            .iter()
            .rev()
            .find_map(|a| a.working_directory.as_deref())
    }
}

/// Final state of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Node identity
    #[serde(flatten)]
    pub node: NodeInfo,
    /// Terminal status, `None` if never reached
    pub status: Option<Status>,
    /// Exit code
    pub exit_code: i32,
    /// Wall time spent running
    pub elapsed_ms: u64,
}

/// A pipeline, job or step ready to run
#[derive(Debug)]
pub struct ExecutionNode<'a> {
    kind: NodeKind,
    attributes: &'a NodeAttributes,
    location: String,
    enabled: bool,
    shell: ShellKind,
    runs: Vec<Run>,
    children: Vec<ExecutionNode<'a>>,
    status: Option<Status>,
    exit_code: i32,
    elapsed: Duration,
}

impl<'a> ExecutionNode<'a> {
    /// Builds the tree for `pipeline`
    ///
    /// The pipeline is expected to be validated; anything that still fails
    /// to decode is reported as a [`DefinitionError`].
    ///
    /// # Errors
    ///
    /// Returns the first undecodable `enabled`, `shell` or run line.
    pub fn build(pipeline: &'a Pipeline) -> Result<Self, DefinitionError> {
        let mut root = Self::new(NodeKind::Pipeline, &pipeline.attributes, PIPELINE_LOCATION)?;

        for (j, job) in pipeline.jobs.iter().enumerate() {
            let mut job_node = Self::new(NodeKind::Job, &job.attributes, &job_location(j))?;

            for (s, step) in job.steps.iter().enumerate() {
                let location = step_location(j, s);
                let mut step_node = Self::new(NodeKind::Step, &step.attributes, &location)?;
                step_node.shell =
                    step.shell_kind()
                        .ok_or_else(|| DefinitionError::InvalidShell {
                            location: location.clone(),
                            shell: step.shell.clone().unwrap_or_default(),
                        })?;
                step_node.runs = step.runs(&location)?;
                job_node.children.push(step_node);
            }

            root.children.push(job_node);
        }

        Ok(root)
    }

    fn new(
        kind: NodeKind,
        attributes: &'a NodeAttributes,
        location: &str,
    ) -> Result<Self, DefinitionError> {
        let enabled = attributes
            .is_enabled()
            .ok_or_else(|| DefinitionError::InvalidEnabled {
                location: location.to_string(),
                value: attributes.enabled.clone().unwrap_or_default(),
            })?;

        Ok(Self {
            kind,
            attributes,
            location: location.to_string(),
            enabled,
            shell: ShellKind::default(),
            runs: Vec::new(),
            children: Vec::new(),
            status: None,
            exit_code: 0,
            elapsed: Duration::ZERO,
        })
    }

    /// Runs the tree, returning the pipeline's exit code
    pub fn execute(&mut self, ctx: &mut RunContext) -> i32 {
        self.run(ctx, &Frame::default())
    }

    /// Node kind
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Position in the definition
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Last status reached, `None` before execution
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Exit code; `0` until the node fails
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Time spent running
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Child nodes
    #[must_use]
    pub fn children(&self) -> &[ExecutionNode<'a>] {
        &self.children
    }

    /// Identity used in events
    #[must_use]
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            kind: self.kind,
            name: self.attributes.name.clone(),
            id: self.attributes.id.clone(),
            location: self.location.clone(),
        }
    }

    /// Every node's final state, depth-first
    #[must_use]
    pub fn report(&self) -> Vec<NodeReport> {
        let mut reports = Vec::new();
        self.collect(&mut reports);
        reports
    }

    fn collect(&self, reports: &mut Vec<NodeReport>) {
        reports.push(NodeReport {
            node: self.info(),
            status: self.status,
            exit_code: self.exit_code,
            elapsed_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
        });
        for child in &self.children {
            child.collect(reports);
        }
    }

    fn run(&mut self, ctx: &mut RunContext, parent: &Frame<'a>) -> i32 {
        if !self.enabled {
            self.skip(ctx, Status::Disabled);
            return 0;
        }

        let _span = tracing::debug_span!("node", kind = %self.kind, location = %self.location).entered();
        let started = Instant::now();
        self.transition(ctx, Status::Running, None);

        let frame = parent.enter(self.kind, self.attributes);
        let exit_code = match self.kind {
            NodeKind::Step => self.run_step(ctx, &frame),
            NodeKind::Pipeline | NodeKind::Job => self.run_children(ctx, &frame),
        };

        self.exit_code = exit_code;
        self.elapsed = started.elapsed();
        let status = if exit_code == 0 {
            Status::Success
        } else {
            Status::Failure
        };
        self.transition(ctx, status, Some(exit_code));
        exit_code
    }

    fn run_children(&mut self, ctx: &mut RunContext, frame: &Frame<'a>) -> i32 {
        let mut exit_code = 0;
        let mut children = self.children.iter_mut();

        for child in children.by_ref() {
            let code = child.run(ctx, frame);
            if code != 0 {
                exit_code = code;
                break;
            }
            if child.status == Some(Status::Disabled) {
                break;
            }
        }

        for child in children {
            child.skip(ctx, Status::Skipped);
        }
        exit_code
    }

    fn run_step(&mut self, ctx: &mut RunContext, frame: &Frame<'a>) -> i32 {
        let node = self.info();
        for run in &self.runs {
            let exit_code = match execute_run(ctx, frame, &node, self.shell, run) {
                Ok(code) => code,
                Err(err) => {
                    tracing::debug!(node = %self.location, line = %run.line, error = %err, "run line failed");
                    ctx.emit(&ExecutionEvent::Error {
                        node: node.clone(),
                        message: err.to_string(),
                    });
                    EXECUTION_ERROR_EXIT_CODE
                }
            };
            if exit_code != 0 {
                return exit_code;
            }
        }
        0
    }

    /// Marks this node and its descendants as not run
    ///
    /// A node disabled in its own right reports `DISABLED` even inside a
    /// skipped branch.
    fn skip(&mut self, ctx: &RunContext, status: Status) {
        let effective = if self.enabled { status } else { Status::Disabled };
        self.transition(ctx, effective, None);
        for child in &mut self.children {
            child.skip(ctx, status);
        }
    }

    fn transition(&mut self, ctx: &RunContext, status: Status, exit_code: Option<i32>) {
        self.status = Some(status);
        let elapsed_ms = exit_code.map(|_| u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX));
        ctx.emit(&ExecutionEvent::Status {
            node: self.info(),
            status,
            exit_code,
            elapsed_ms,
        });
    }
}
