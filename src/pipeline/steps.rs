//! Steps and the commands they run

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::definition::run_block;
use super::errors::DefinitionError;
use super::node::{NodeAttributes, attribute_setters, check_syntax};
use super::types::CaptureType;
use crate::resolver::is_valid_property_name;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;

/// Prefix shared by all directives
pub const DIRECTIVE_PREFIX: &str = "--";

/// Directive delegating a command to an extension script
pub const EXTENSION_DIRECTIVE: &str = "--extension";

/// Directive printing a message
pub const PRINT_DIRECTIVE: &str = "--print";

static APPEND_CAPTURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<command>.*?)\s*>>\s*\$(?P<variable>[A-Za-z0-9_][A-Za-z0-9_.\-]*)$")
        .expect("append capture pattern")
});

static OVERWRITE_CAPTURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<command>.*?)\s*>\s*\$(?P<variable>[A-Za-z0-9_][A-Za-z0-9_.\-]*)$")
        .expect("overwrite capture pattern")
});

/// Shell used to run a step's commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShellKind {
    /// `bash` with pipefail
    #[default]
    Bash,
    /// POSIX `sh -e`
    Sh,
    /// `zsh` with pipefail
    Zsh,
    /// `fish`
    Fish,
    /// `ksh` with pipefail
    Ksh,
    /// `dash -e`
    Dash,
    /// No shell: the command is split into argv
    None,
}

impl ShellKind {
    /// Parses a `shell:` value; `default` means bash
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "default" | "bash" => Some(Self::Bash),
            "sh" => Some(Self::Sh),
            "zsh" => Some(Self::Zsh),
            "fish" => Some(Self::Fish),
            "ksh" => Some(Self::Ksh),
            "dash" => Some(Self::Dash),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bash => "bash",
            Self::Sh => "sh",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
            Self::Ksh => "ksh",
            Self::Dash => "dash",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// What a command line asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Shell command
    Command,
    /// `--print <message>`
    Print,
    /// `--extension <url> [checksum]`
    Extension,
}

/// One command line of a step, with capture suffix and directive decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    /// The line as written
    pub line: String,
    /// Text to execute: capture suffix and directive word removed
    pub command: String,
    /// Capture mode
    pub capture_type: CaptureType,
    /// Capture target, set unless `capture_type` is `None`
    pub capture_variable: Option<String>,
    /// Command, print or extension
    pub kind: RunKind,
}

impl Run {
    /// Decodes one command line
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] for an invalid capture variable, an
    /// unknown directive, an empty command, or text that does not tokenize.
    pub fn parse(line: &str, location: &str) -> Result<Self, DefinitionError> {
        let line = line.trim();
        let (command, capture_type, capture_variable) = split_capture(line);

        if let Some(variable) = &capture_variable
            && !is_valid_property_name(variable)
        {
            return Err(DefinitionError::InvalidCaptureVariable {
                location: location.to_string(),
                variable: variable.clone(),
            });
        }

        let (kind, command) = split_directive(command, location)?;
        if command.is_empty() && kind != RunKind::Print {
            return Err(DefinitionError::EmptyCommand {
                location: location.to_string(),
            });
        }
        check_syntax(command, location)?;

        Ok(Self {
            line: line.to_string(),
            command: command.to_string(),
            capture_type,
            capture_variable,
            kind,
        })
    }
}

fn split_capture(line: &str) -> (&str, CaptureType, Option<String>) {
    for (pattern, capture_type) in [
        (&*APPEND_CAPTURE, CaptureType::Append),
        (&*OVERWRITE_CAPTURE, CaptureType::Overwrite),
    ] {
        if let Some(captures) = pattern.captures(line)
            && let (Some(command), Some(variable)) =
                (captures.name("command"), captures.name("variable"))
        {
            return (
                command.as_str().trim_end(),
                capture_type,
                Some(variable.as_str().to_string()),
            );
        }
    }
    (line, CaptureType::None, None)
}

fn split_directive<'a>(
    command: &'a str,
    location: &str,
) -> Result<(RunKind, &'a str), DefinitionError> {
    if !command.starts_with(DIRECTIVE_PREFIX) {
        return Ok((RunKind::Command, command));
    }

    let (word, rest) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));
    match word {
        EXTENSION_DIRECTIVE => Ok((RunKind::Extension, rest.trim())),
        PRINT_DIRECTIVE => Ok((RunKind::Print, rest.trim())),
        _ => Err(DefinitionError::UnknownDirective {
            location: location.to_string(),
            directive: word.to_string(),
        }),
    }
}

/// Splits a `run` block into command lines
///
/// Blank lines and `#` comments are dropped; a line ending in ` \` is
/// joined to the next one.
pub fn parse_run_block(block: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = String::new();

    for raw in block.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }

        if let Some(head) = line.strip_suffix(" \\") {
            pending.push_str(head.trim_end());
            pending.push(' ');
            continue;
        }

        pending.push_str(line);
        let merged = pending.trim();
        if !merged.is_empty() {
            lines.push(merged.to_string());
        }
        pending.clear();
    }

    let merged = pending.trim();
    if !merged.is_empty() {
        lines.push(merged.to_string());
    }
    lines
}

/// A step: shared attributes, a shell and its command lines
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Step {
    /// Shared attributes
    #[serde(flatten)]
    pub attributes: NodeAttributes,

    /// Raw `shell` value, validated later
    #[serde(default)]
    pub shell: Option<String>,

    /// Command lines, already split and continuation-merged
    #[serde(default, rename = "run", deserialize_with = "run_block")]
    pub commands: Vec<String>,
}

impl Step {
    /// Creates a new step builder
    pub fn builder() -> StepBuilder {
        StepBuilder::new()
    }

    /// Decoded shell; bash when unset
    pub fn shell_kind(&self) -> Option<ShellKind> {
        self.shell.as_deref().map_or(Some(ShellKind::Bash), ShellKind::from_name)
    }

    /// Decodes every command line
    ///
    /// # Errors
    ///
    /// Returns the first line that fails [`Run::parse`].
    pub fn runs(&self, location: &str) -> Result<Vec<Run>, DefinitionError> {
        self.commands
            .iter()
            .enumerate()
            .map(|(i, line)| Run::parse(line, &format!("{location}.run[{i}]")))
            .collect()
    }

    /// Validates the step at `location`
    ///
    /// # Errors
    ///
    /// Returns the first [`DefinitionError`] found.
    pub fn validate_at(&self, location: &str) -> Result<(), DefinitionError> {
        self.attributes.validate_at(location)?;

        if self.shell_kind().is_none() {
            return Err(DefinitionError::InvalidShell {
                location: location.to_string(),
                shell: self.shell.clone().unwrap_or_default(),
            });
        }

        if self.commands.is_empty() {
            return Err(DefinitionError::EmptyStep {
                location: location.to_string(),
            });
        }

        self.runs(location).map(|_| ())
    }
}

/// Builder for creating steps
#[derive(Debug, Clone, Default)]
pub struct StepBuilder {
    step: Step,
}

impl StepBuilder {
    /// Creates a new step builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shell
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.step.shell = Some(shell.into());
        self
    }

    /// Appends one command line
    pub fn run(mut self, command: impl Into<String>) -> Self {
        self.step.commands.push(command.into());
        self
    }

    /// Appends every line of a `run` block
    pub fn run_block(mut self, block: &str) -> Self {
        self.step.commands.extend(parse_run_block(block));
        self
    }

    /// Builds the step
    pub fn build(self) -> Step {
        self.step
    }
}

attribute_setters!(StepBuilder, step);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("echo a >> $X", "echo a", CaptureType::Append, Some("X"))]
    #[case("echo a>>$X", "echo a", CaptureType::Append, Some("X"))]
    #[case("echo a > $X", "echo a", CaptureType::Overwrite, Some("X"))]
    #[case("echo a>$out_1", "echo a", CaptureType::Overwrite, Some("out_1"))]
    #[case("echo a > file.txt", "echo a > file.txt", CaptureType::None, None)]
    #[case("echo $X", "echo $X", CaptureType::None, None)]
    fn test_capture_detection(
        #[case] line: &str,
        #[case] command: &str,
        #[case] capture_type: CaptureType,
        #[case] variable: Option<&str>,
    ) {
        let run = Run::parse(line, "step.run[0]").unwrap();
        assert_eq!(run.command, command);
        assert_eq!(run.capture_type, capture_type);
        assert_eq!(run.capture_variable.as_deref(), variable);
        assert_eq!(run.kind, RunKind::Command);
    }

    #[test]
    fn test_invalid_capture_variable() {
        let err = Run::parse("echo a > $a.b", "step.run[0]").unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidCaptureVariable { .. }));
        let err = Run::parse("echo a > $9x", "step.run[0]").unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidCaptureVariable { .. }));
    }

    #[test]
    fn test_directives() {
        let run = Run::parse("--extension file:///tmp/ext abc", "r").unwrap();
        assert_eq!(run.kind, RunKind::Extension);
        assert_eq!(run.command, "file:///tmp/ext abc");

        let run = Run::parse("--print hello ${{ who }} > $MSG", "r").unwrap();
        assert_eq!(run.kind, RunKind::Print);
        assert_eq!(run.command, "hello ${{ who }}");
        assert_eq!(run.capture_variable.as_deref(), Some("MSG"));

        assert!(matches!(
            Run::parse("--bogus x", "r"),
            Err(DefinitionError::UnknownDirective { .. })
        ));
        assert!(matches!(
            Run::parse("--extension", "r"),
            Err(DefinitionError::EmptyCommand { .. })
        ));
    }

    #[test]
    fn test_empty_command_after_capture() {
        assert!(matches!(
            Run::parse("> $X", "r"),
            Err(DefinitionError::EmptyCommand { .. })
        ));
    }

    #[test]
    fn test_run_block_parsing() {
        let block = "\n# comment\necho one\n\n./configure \\\n  --prefix=/usr \\\n  --quiet\necho two\n";
        assert_eq!(
            parse_run_block(block),
            vec!["echo one", "./configure --prefix=/usr --quiet", "echo two"]
        );
    }

    #[test]
    fn test_shell_kind() {
        assert_eq!(Step::default().shell_kind(), Some(ShellKind::Bash));
        assert_eq!(ShellKind::from_name("default"), Some(ShellKind::Bash));
        assert_eq!(ShellKind::from_name("none"), Some(ShellKind::None));
        assert_eq!(ShellKind::from_name("powershell"), None);
    }

    #[test]
    fn test_step_validation() {
        let step = Step::builder().id("s").shell("tcsh").run("echo").build();
        assert!(matches!(
            step.validate_at("s"),
            Err(DefinitionError::InvalidShell { .. })
        ));

        let step = Step::builder().id("s").build();
        assert!(matches!(
            step.validate_at("s"),
            Err(DefinitionError::EmptyStep { .. })
        ));

        let step = Step::builder().run("echo ${{ unterminated").build();
        assert!(matches!(
            step.validate_at("s"),
            Err(DefinitionError::Syntax { .. })
        ));
    }
}
