//! Error types for pipeline domain
//!
//! Errors come in two tiers. [`SyntaxError`] and [`DefinitionError`] are
//! raised before anything runs and abort the whole invocation.
//! [`ExecutionError`] is local to one step: it turns that step into a
//! failure with exit code 1 and never crosses a node boundary.

use std::fmt;
use thiserror::Error;

/// Errors that can occur during pipeline operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A pipeline definition failed structural validation
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// A value could not be tokenized
    #[error("Syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// A pipeline document could not be read or deserialized
    #[error("Failed to load pipeline '{path}': {reason}")]
    Load {
        /// Path (or `<inline>`) of the document.
        path: String,
        /// Reason reported by the reader or deserializer.
        reason: String,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl PipelineError {
    /// Returns true for errors discovered before execution starts
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Definition(_) | Self::Syntax(_) | Self::Load { .. })
    }
}

/// Malformed token in a command, environment value, property value or path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    /// `${{` without a closing `}}`
    #[error("unterminated reference at offset {position} in '{input}'")]
    UnterminatedReference {
        /// The full input string.
        input: String,
        /// Byte offset of the opening `${{`.
        position: usize,
    },

    /// `${{ }}` with nothing inside
    #[error("empty reference at offset {position} in '{input}'")]
    EmptyReference {
        /// The full input string.
        input: String,
        /// Byte offset of the opening `${{`.
        position: usize,
    },

    /// Reference body is not a valid (optionally scoped) property name
    #[error("invalid reference '{reference}' at offset {position}")]
    InvalidReference {
        /// The trimmed body between `${{` and `}}`.
        reference: String,
        /// Byte offset of the opening `${{`.
        position: usize,
    },
}

/// Structural errors in a pipeline definition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// Name present but blank
    #[error("{location}: name cannot be empty")]
    EmptyName {
        /// Location of the node.
        location: String,
    },

    /// Id does not match the id grammar
    #[error("{location}: invalid id '{id}'")]
    InvalidId {
        /// Location of the node.
        location: String,
        /// The offending id.
        id: String,
    },

    /// Id used by more than one node
    #[error("{location}: duplicate id '{id}' (first used at {first})")]
    DuplicateId {
        /// Location of the second node.
        location: String,
        /// The duplicated id.
        id: String,
        /// Location of the first node using it.
        first: String,
    },

    /// `enabled` is neither "true" nor "false"
    #[error("{location}: invalid enabled value '{value}'")]
    InvalidEnabled {
        /// Location of the node.
        location: String,
        /// The raw value.
        value: String,
    },

    /// `timeout-minutes` outside 1..=4320
    #[error("{location}: invalid timeout-minutes {value}, must be between 1 and 4320")]
    InvalidTimeout {
        /// Location of the node.
        location: String,
        /// The out-of-range value.
        value: u64,
    },

    /// Environment variable name does not match the environment grammar
    #[error("{location}: invalid environment variable name '{name}'")]
    InvalidEnvironmentName {
        /// Location of the node.
        location: String,
        /// The offending name.
        name: String,
    },

    /// Property name does not match the property grammar
    #[error("{location}: invalid property name '{name}'")]
    InvalidPropertyName {
        /// Location of the node.
        location: String,
        /// The offending name.
        name: String,
    },

    /// Unknown shell kind
    #[error("{location}: invalid shell '{shell}'")]
    InvalidShell {
        /// Location of the node.
        location: String,
        /// The raw shell value.
        shell: String,
    },

    /// Capture suffix names an invalid property
    #[error("{location}: invalid capture variable '{variable}'")]
    InvalidCaptureVariable {
        /// Location of the command.
        location: String,
        /// The offending variable.
        variable: String,
    },

    /// Line starts with `--` but is not a known directive
    #[error("{location}: unknown directive '{directive}'")]
    UnknownDirective {
        /// Location of the command.
        location: String,
        /// The directive word.
        directive: String,
    },

    /// Pipeline must have at least one job
    #[error("{location}: pipeline must have at least one job")]
    EmptyPipeline {
        /// Location of the pipeline.
        location: String,
    },

    /// Job must have at least one step
    #[error("{location}: job must have at least one step")]
    EmptyJob {
        /// Location of the job.
        location: String,
    },

    /// Step must have at least one command
    #[error("{location}: step must have at least one command")]
    EmptyStep {
        /// Location of the step.
        location: String,
    },

    /// Nothing left to execute after stripping a capture suffix or directive
    #[error("{location}: empty command")]
    EmptyCommand {
        /// Location of the command.
        location: String,
    },

    /// A value failed to tokenize
    #[error("{location}: {source}")]
    Syntax {
        /// Location of the value.
        location: String,
        /// Tokenizer error.
        source: SyntaxError,
    },
}

/// Which kind of token was left unresolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `${{ name }}`
    Property,
    /// `${{ scope.name }}`
    ScopedProperty,
    /// `$NAME`
    EnvironmentVariable,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property => write!(f, "property"),
            Self::ScopedProperty => write!(f, "scoped property"),
            Self::EnvironmentVariable => write!(f, "environment variable"),
        }
    }
}

/// Errors local to one step's execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// A reference survived fixpoint resolution
    #[error("unresolved {kind} '{name}'")]
    UnresolvedReference {
        /// Token kind.
        kind: ReferenceKind,
        /// Lookup name (scoped names include their scope).
        name: String,
    },

    /// Working directory unusable
    #[error("working directory '{path}' {reason}")]
    WorkingDirectory {
        /// Resolved path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Resolved command cannot be split into an argument vector
    #[error("invalid command '{command}': {reason}")]
    InvalidCommand {
        /// Resolved command text.
        command: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Program could not be found
    #[error("command not found: '{program}'")]
    CommandNotFound {
        /// Program name (argv[0]).
        program: String,
    },

    /// Program was found but could not be started
    #[error("failed to start '{program}': {reason}")]
    Spawn {
        /// Program name (argv[0]).
        program: String,
        /// OS error text.
        reason: String,
    },

    /// Step deadline expired and the process was killed
    #[error("step timeout exceeded after {minutes} minute(s)")]
    StepTimeoutExceeded {
        /// Configured timeout.
        minutes: u64,
    },

    /// Run was cancelled before the command started
    #[error("run cancelled")]
    Cancelled,

    /// Resolved value no longer tokenizes
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// IPC channel failure
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// Extension could not be resolved or verified
    #[error(transparent)]
    Extension(#[from] ExtensionError),

    /// Other IO failure while running a command
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors reading or writing an IPC channel file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// Key does not match the property key grammar
    #[error("invalid IPC key '{key}'")]
    InvalidKey {
        /// The offending key.
        key: String,
    },

    /// Value is not valid Base64 or not UTF-8
    #[error("invalid IPC value for key '{key}': {reason}")]
    InvalidValue {
        /// Key of the entry.
        key: String,
        /// Decoder error.
        reason: String,
    },

    /// Channel file IO failure
    #[error("IPC IO error on '{path}': {reason}")]
    Io {
        /// Channel file path.
        path: String,
        /// OS error text.
        reason: String,
    },
}

/// Errors from the extension contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    /// Directive arguments are not `<url> [checksum]`
    #[error("invalid extension directive: {0}")]
    InvalidDirective(String),

    /// Checksum is not 40, 64 or 128 hex characters
    #[error("invalid checksum '{checksum}'")]
    InvalidChecksum {
        /// The raw checksum.
        checksum: String,
    },

    /// Script bytes do not match the checksum
    #[error("checksum mismatch for '{url}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Extension URL.
        url: String,
        /// Expected digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// URL scheme is not handled by the resolver
    #[error("unsupported extension URL scheme '{scheme}'")]
    UnsupportedScheme {
        /// The scheme.
        scheme: String,
    },

    /// Extension path does not exist
    #[error("extension not found: '{path}'")]
    NotFound {
        /// Path looked up.
        path: String,
    },

    /// IO failure reading the extension
    #[error("extension IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExtensionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
