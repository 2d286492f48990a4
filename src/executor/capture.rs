//! Output capture and property import
//!
//! A command ending in `> $VAR` or `>> $VAR` has its output stored in the
//! run-time property map instead of printed. The value is written under
//! every scoped alias of `VAR` plus the legacy `INPUT_` twins, so later
//! steps can read it as `${{ VAR }}`, `${{ step.VAR }}` and so on.

use crate::pipeline::CaptureType;
use crate::resolver::{LEGACY_PREFIX, PropertyMap, ScopePath};

/// Output lines held back from the console
#[derive(Debug, Default, Clone)]
pub struct CaptureBuffer {
    lines: Vec<String>,
}

impl CaptureBuffer {
    /// Appends one line
    pub fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Returns true if nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines joined with `\n`, no trailing newline
    #[must_use]
    pub fn into_value(self) -> String {
        self.lines.join("\n")
    }
}

/// Value stored by a capture given the previous value of the variable
#[must_use]
pub fn captured_value(capture_type: CaptureType, existing: Option<&str>, captured: &str) -> String {
    match (capture_type, existing) {
        (CaptureType::Append, Some(existing)) if !existing.is_empty() => {
            format!("{existing}\n{captured}")
        }
        _ => captured.to_string(),
    }
}

/// Stores a captured value under every alias of `variable`
///
/// `existing` is the value the step currently sees for `variable`; only
/// [`CaptureType::Append`] uses it.
pub fn apply_capture(
    properties: &mut PropertyMap,
    scope: &ScopePath,
    capture_type: CaptureType,
    variable: &str,
    existing: Option<&str>,
    captured: &str,
) {
    if capture_type == CaptureType::None {
        return;
    }
    let value = captured_value(capture_type, existing, captured);
    tracing::trace!(variable = %variable, capture = ?capture_type, "storing captured output");
    for key in scope.aliases_with_legacy(variable) {
        properties.insert(key, value.clone());
    }
}

/// Merges properties an extension wrote back through its IPC channel
///
/// Plain names are stored under every alias; keys that are already
/// qualified (`a.b`, `INPUT_x`) are stored as given.
pub fn import_properties(properties: &mut PropertyMap, scope: &ScopePath, imported: PropertyMap) {
    for (key, value) in imported {
        if key.contains('.') || key.starts_with(LEGACY_PREFIX) {
            properties.insert(key, value);
        } else {
            for alias in scope.aliases_with_legacy(&key) {
                properties.insert(alias, value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scope() -> ScopePath {
        ScopePath::default().child(Some("p")).child(None).child(Some("s"))
    }

    #[test]
    fn test_buffer_joins_without_trailing_newline() {
        let mut buffer = CaptureBuffer::default();
        assert!(buffer.is_empty());
        buffer.push("a".to_string());
        buffer.push("b".to_string());
        assert_eq!(buffer.into_value(), "a\nb");
    }

    #[test]
    fn test_append_joins_with_newline() {
        assert_eq!(captured_value(CaptureType::Append, Some("a"), "b"), "a\nb");
        assert_eq!(captured_value(CaptureType::Append, Some(""), "b"), "b");
        assert_eq!(captured_value(CaptureType::Append, None, "b"), "b");
        assert_eq!(captured_value(CaptureType::Overwrite, Some("a"), "b"), "b");
    }

    #[test]
    fn test_apply_capture_writes_every_alias() {
        let mut properties = PropertyMap::new();
        apply_capture(&mut properties, &scope(), CaptureType::Overwrite, "out", None, "v");

        let mut keys: Vec<_> = properties.keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            ["INPUT_out", "INPUT_p.s.out", "INPUT_s.out", "out", "p.s.out", "s.out"]
        );
        assert!(properties.values().all(|v| v == "v"));
    }

    #[test]
    fn test_apply_capture_none_is_noop() {
        let mut properties = PropertyMap::new();
        apply_capture(&mut properties, &scope(), CaptureType::None, "out", None, "v");
        assert!(properties.is_empty());
    }

    #[test]
    fn test_import_keeps_qualified_keys() {
        let mut properties = PropertyMap::new();
        let imported = PropertyMap::from([
            ("result".to_string(), "1".to_string()),
            ("other.result".to_string(), "2".to_string()),
        ]);
        import_properties(&mut properties, &scope(), imported);

        assert_eq!(properties.get("s.result").map(String::as_str), Some("1"));
        assert_eq!(properties.get("INPUT_result").map(String::as_str), Some("1"));
        assert_eq!(properties.get("other.result").map(String::as_str), Some("2"));
        assert!(!properties.contains_key("s.other.result"));
    }
}
