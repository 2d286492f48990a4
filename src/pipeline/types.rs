//! Core types for pipeline domain
//!
//! This module contains fundamental types shared by the static model and
//! the execution tree.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a node in the execution tree
///
/// A node starts without a status, moves to `Running` when entered and
/// ends in `Success` or `Failure`, or goes straight to `Disabled` or
/// `Skipped` without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Node is executing
    Running,
    /// Node was disabled by its definition
    Disabled,
    /// Node did not run because an earlier sibling failed or was disabled
    Skipped,
    /// Node finished with exit code 0
    Success,
    /// Node finished with a non-zero exit code
    Failure,
}

impl Status {
    /// Returns true if status is successful
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if status is a failure
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Returns true for statuses reached without running
    #[must_use]
    pub fn is_not_run(&self) -> bool {
        matches!(self, Self::Disabled | Self::Skipped)
    }

    /// Returns true once the node can no longer change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Lowercase name used on the console
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Disabled => "disabled",
            Self::Skipped => "skipped",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Disabled => write!(f, "DISABLED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Level of a node in the pipeline tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Root
    Pipeline,
    /// Child of the pipeline
    Job,
    /// Child of a job, owns commands
    Step,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Job => write!(f, "job"),
            Self::Step => write!(f, "step"),
        }
    }
}

/// How a command's output is diverted into a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureType {
    /// Output goes to the console
    None,
    /// `>> $VAR`, appended to the existing value
    Append,
    /// `> $VAR`, replaces the existing value
    Overwrite,
}

impl fmt::Display for CaptureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Append => write!(f, "APPEND"),
            Self::Overwrite => write!(f, "OVERWRITE"),
        }
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
