//! Tokens and name grammars
//!
//! A parsed string is a flat sequence of [`Token`]s. Rendering a sequence
//! with [`render`] gives text that parses back to the same sequence.

use std::fmt;

/// One piece of a parsed string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Literal text, escapes kept verbatim
    Text(String),
    /// `${{ name }}`
    Variable(String),
    /// `${{ scope.name }}`, `scope` holds every segment but the last
    ScopedVariable {
        /// Dotted scope prefix.
        scope: String,
        /// Property name.
        name: String,
    },
    /// `$NAME`
    EnvironmentVariable(String),
}

impl Token {
    /// Key used to look the token up, `None` for text
    #[must_use]
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Text(_) => None,
            Self::Variable(name) | Self::EnvironmentVariable(name) => Some(name.clone()),
            Self::ScopedVariable { scope, name } => Some(format!("{scope}.{name}")),
        }
    }

    /// Returns true for property references, scoped or not
    #[must_use]
    pub fn is_property(&self) -> bool {
        matches!(self, Self::Variable(_) | Self::ScopedVariable { .. })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Variable(name) => write!(f, "${{{{ {name} }}}}"),
            Self::ScopedVariable { scope, name } => write!(f, "${{{{ {scope}.{name} }}}}"),
            Self::EnvironmentVariable(name) => write!(f, "${name}"),
        }
    }
}

/// Renders tokens back to their text form
#[must_use]
pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(ToString::to_string).collect()
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `[A-Za-z_][A-Za-z0-9_-]*`, the grammar for node ids and scope segments
#[must_use]
pub fn is_valid_id(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(is_word_start) && chars.all(|c| is_word(c) || c == '-')
}

/// `[A-Za-z_]([A-Za-z0-9_-]*[A-Za-z0-9_])?`, the grammar for property names
#[must_use]
pub fn is_valid_property_name(value: &str) -> bool {
    is_valid_id(value) && value.chars().last().is_some_and(is_word)
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the grammar for environment variable names
#[must_use]
pub fn is_valid_environment_name(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(is_word_start) && chars.all(is_word)
}

/// A property name optionally prefixed by dotted scope ids (`job.step.name`)
#[must_use]
pub fn is_valid_property_key(value: &str) -> bool {
    match value.rsplit_once('.') {
        Some((scope, name)) => {
            is_valid_property_name(name) && scope.split('.').all(is_valid_id)
        }
        None => is_valid_property_name(value),
    }
}
