//! Event listeners for pipeline execution.
//!
//! The executor reports status transitions, commands, output lines and
//! errors as [`ExecutionEvent`]s. Listeners decide what to do with them:
//! print the console protocol, log through `tracing`, or record them for
//! inspection.

use crate::infrastructure::OutputFormat;
use crate::pipeline::{NodeKind, Status};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::{Level, event};

/// Identifies the node an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    /// Node kind
    pub kind: NodeKind,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Position in the definition, e.g. `pipeline.jobs[0].steps[1]`
    pub location: String,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.kind)?;
        if let Some(name) = &self.name {
            write!(f, " name=[{name}]")?;
        }
        if let Some(id) = &self.id {
            write!(f, " id=[{id}]")?;
        }
        if self.name.is_none() && self.id.is_none() {
            write!(f, " at=[{}]", self.location)?;
        }
        Ok(())
    }
}

/// Execution event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ExecutionEvent {
    /// Node changed status; exit code and elapsed time are set once finished
    Status {
        /// Node
        node: NodeInfo,
        /// New status
        status: Status,
        /// Exit code, terminal statuses only
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        /// Elapsed milliseconds, terminal statuses only
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
    /// A run line is about to execute
    Command {
        /// Node
        node: NodeInfo,
        /// Resolved command text
        command: String,
    },
    /// One line of command output
    Output {
        /// Node
        node: NodeInfo,
        /// Output line without the trailing newline
        line: String,
    },
    /// A run line failed before or while executing
    Error {
        /// Node
        node: NodeInfo,
        /// Error message
        message: String,
    },
}

impl ExecutionEvent {
    /// Node the event belongs to
    #[must_use]
    pub fn node(&self) -> &NodeInfo {
        match self {
            Self::Status { node, .. }
            | Self::Command { node, .. }
            | Self::Output { node, .. }
            | Self::Error { node, .. } => node,
        }
    }
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status {
                node,
                status,
                exit_code,
                elapsed_ms,
            } => {
                write!(f, "{node} status=[{}]", status.as_str())?;
                if let Some(code) = exit_code {
                    write!(f, " exit-code=[{code}]")?;
                }
                if let Some(ms) = elapsed_ms {
                    write!(f, " ms=[{ms}]")?;
                }
                Ok(())
            }
            Self::Command { command, .. } => write!(f, "$ {command}"),
            Self::Output { line, .. } => write!(f, "> {line}"),
            Self::Error { node, message } => write!(f, "@error {node} -> {message}"),
        }
    }
}

/// Listener trait for execution events
pub trait ExecutionListener: Send + Sync {
    /// Called when an event occurs
    fn on_event(&self, event: &ExecutionEvent);
}

/// Composite listener that combines multiple listeners
#[derive(Default)]
pub struct CompositeListener {
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl fmt::Debug for CompositeListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeListener")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl CompositeListener {
    /// Creates a new composite listener
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener
    pub fn add(&mut self, listener: Arc<dyn ExecutionListener>) {
        self.listeners.push(listener);
    }

    /// Number of listeners
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener was added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl ExecutionListener for CompositeListener {
    fn on_event(&self, event: &ExecutionEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

/// Tracing listener that logs events
#[derive(Debug, Default)]
pub struct TracingListener;

impl ExecutionListener for TracingListener {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::Status {
                node,
                status: Status::Failure,
                exit_code,
                ..
            } => {
                event!(Level::WARN, node = %node.location, exit_code = ?exit_code, "Node failed");
            }
            ExecutionEvent::Status {
                node,
                status,
                exit_code,
                elapsed_ms,
            } => {
                event!(Level::DEBUG, node = %node.location, status = %status.as_str(), exit_code = ?exit_code, elapsed_ms = ?elapsed_ms, "Node status");
            }
            ExecutionEvent::Command { node, command } => {
                event!(Level::DEBUG, node = %node.location, command = %command, "Command started");
            }
            ExecutionEvent::Output { node, line } => {
                event!(Level::TRACE, node = %node.location, output = %line);
            }
            ExecutionEvent::Error { node, message } => {
                event!(Level::ERROR, node = %node.location, error = %message, "Command failed");
            }
        }
    }
}

/// Writes the console protocol, one line per event
pub struct ConsoleListener {
    format: OutputFormat,
    timestamps: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for ConsoleListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleListener")
            .field("format", &self.format)
            .field("timestamps", &self.timestamps)
            .finish_non_exhaustive()
    }
}

impl ConsoleListener {
    /// Listener writing to stdout
    #[must_use]
    pub fn stdout(format: OutputFormat, timestamps: bool) -> Self {
        Self::new(Box::new(std::io::stdout()), format, timestamps)
    }

    /// Listener writing to `out`
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>, format: OutputFormat, timestamps: bool) -> Self {
        Self {
            format,
            timestamps,
            out: Mutex::new(out),
        }
    }

    fn render(&self, event: &ExecutionEvent) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(event).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to serialize event");
                event.to_string()
            }),
            OutputFormat::Text if self.timestamps => {
                format!("{} {event}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
            }
            OutputFormat::Text => event.to_string(),
        }
    }
}

impl ExecutionListener for ConsoleListener {
    fn on_event(&self, event: &ExecutionEvent) {
        let line = self.render(event);
        let mut out = self.out.lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

/// Stores events in memory; clones share the same buffer
#[derive(Debug, Default, Clone)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl RecordingListener {
    /// Creates a new recording listener
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets all recorded events
    #[must_use]
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    /// Recorded status transitions as `(location, status)`
    #[must_use]
    pub fn statuses(&self) -> Vec<(String, Status)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::Status { node, status, .. } => {
                    Some((node.location.clone(), *status))
                }
                _ => None,
            })
            .collect()
    }

    /// Recorded output lines, in order
    #[must_use]
    pub fn output(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::Output { line, .. } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clears all recorded events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ExecutionListener for RecordingListener {
    fn on_event(&self, event: &ExecutionEvent) {
        self.events.lock().push(event.clone());
    }
}
