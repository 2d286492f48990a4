//! Tokenizer for the substitution language
//!
//! Recognizes, in order: `${{ scope.name }}`, `${{ name }}`, `$NAME`, and
//! literal text up to the next candidate. A backslash directly before `$`
//! makes the `$` literal; the backslash stays in the text so the shell
//! still sees it.

use super::token::{Token, is_valid_id, is_valid_property_name};
use crate::infrastructure::LruCache;
use crate::pipeline::SyntaxError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Capacity used by [`Parser::default`]
pub const DEFAULT_PARSE_CACHE_CAPACITY: usize = 1000;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

/// Parses `input` into tokens
///
/// # Errors
///
/// Returns [`SyntaxError`] for an unterminated `${{`, an empty `${{ }}`,
/// or a reference body that is not a valid property name.
///
/// # Example
///
/// ```rust
/// use pipeliner::resolver::{Token, parse};
///
/// let tokens = parse("echo ${{ greeting }} $USER").unwrap();
/// assert_eq!(tokens[1], Token::Variable("greeting".to_string()));
/// assert_eq!(tokens[3], Token::EnvironmentVariable("USER".to_string()));
/// ```
pub fn parse(input: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        let offset = input.len() - rest.len();

        if c == '\\' {
            // `\$` and `\\` are kept as two literal characters
            let escaped = rest[1..].chars().next().filter(|n| *n == '$' || *n == '\\');
            let width = 1 + escaped.map_or(0, char::len_utf8);
            text.push_str(&rest[..width]);
            rest = &rest[width..];
            continue;
        }

        if c == '$' {
            if rest.starts_with(OPEN) {
                let body_start = OPEN.len();
                let Some(end) = rest[body_start..].find(CLOSE) else {
                    return Err(SyntaxError::UnterminatedReference {
                        input: input.to_string(),
                        position: offset,
                    });
                };
                let body = rest[body_start..body_start + end].trim();
                let token = reference(input, body, offset)?;
                flush(&mut text, &mut tokens);
                tokens.push(token);
                rest = &rest[body_start + end + CLOSE.len()..];
                continue;
            }

            let name_len = environment_name_len(&rest[1..]);
            if name_len > 0 {
                flush(&mut text, &mut tokens);
                tokens.push(Token::EnvironmentVariable(rest[1..=name_len].to_string()));
                rest = &rest[1 + name_len..];
                continue;
            }
        }

        text.push(c);
        rest = &rest[c.len_utf8()..];
    }

    flush(&mut text, &mut tokens);
    Ok(tokens)
}

fn flush(text: &mut String, tokens: &mut Vec<Token>) {
    if !text.is_empty() {
        tokens.push(Token::Text(std::mem::take(text)));
    }
}

fn environment_name_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return 0,
    }
    chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map_or(s.len(), |(i, _)| i)
}

fn reference(input: &str, body: &str, position: usize) -> Result<Token, SyntaxError> {
    if body.is_empty() {
        return Err(SyntaxError::EmptyReference {
            input: input.to_string(),
            position,
        });
    }

    let invalid = || SyntaxError::InvalidReference {
        reference: body.to_string(),
        position,
    };

    match body.rsplit_once('.') {
        None if is_valid_property_name(body) => Ok(Token::Variable(body.to_string())),
        Some((scope, name))
            if is_valid_property_name(name) && scope.split('.').all(is_valid_id) =>
        {
            Ok(Token::ScopedVariable {
                scope: scope.to_string(),
                name: name.to_string(),
            })
        }
        _ => Err(invalid()),
    }
}

/// Tokenizer with a bounded parse cache
///
/// Owned by the run context; the same command text is parsed once per run.
#[derive(Debug)]
pub struct Parser {
    cache: Mutex<LruCache<String, Arc<[Token]>>>,
}

impl Parser {
    /// Creates a parser caching at most `capacity` inputs
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Parses `input`, reusing a cached result when available
    ///
    /// # Errors
    ///
    /// See [`parse`]. Failures are not cached.
    pub fn parse(&self, input: &str) -> Result<Arc<[Token]>, SyntaxError> {
        let key = input.to_string();
        if let Some(tokens) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(tokens));
        }

        let tokens: Arc<[Token]> = parse(input)?.into();
        self.cache.lock().put(key, Arc::clone(&tokens));
        Ok(tokens)
    }

    /// Number of cached inputs
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_PARSE_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::token::render;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn text(s: &str) -> Token {
        Token::Text(s.to_string())
    }

    #[test]
    fn test_parse_mixed() {
        let tokens = parse("echo ${{ a }}-${{job.b}} $HOME/x").unwrap();
        assert_eq!(
            tokens,
            vec![
                text("echo "),
                Token::Variable("a".to_string()),
                text("-"),
                Token::ScopedVariable {
                    scope: "job".to_string(),
                    name: "b".to_string()
                },
                text(" "),
                Token::EnvironmentVariable("HOME".to_string()),
                text("/x"),
            ]
        );
    }

    #[test]
    fn test_environment_word_boundary() {
        let tokens = parse("$FOO-bar $1 $ ${HOME}").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::EnvironmentVariable("FOO".to_string()),
                text("-bar $1 $ ${HOME}"),
            ]
        );
    }

    #[test]
    fn test_escapes_are_literal() {
        assert_eq!(parse(r"echo \$HOME").unwrap(), vec![text(r"echo \$HOME")]);
        assert_eq!(
            parse(r"echo \${{ a }}").unwrap(),
            vec![text(r"echo \${{ a }}")]
        );
        assert_eq!(
            parse(r"\\$HOME").unwrap(),
            vec![text(r"\\"), Token::EnvironmentVariable("HOME".to_string())]
        );
    }

    #[test]
    fn test_deeply_scoped_reference() {
        let tokens = parse("${{ p.j.s.name }}").unwrap();
        assert_eq!(
            tokens,
            vec![Token::ScopedVariable {
                scope: "p.j.s".to_string(),
                name: "name".to_string()
            }]
        );
    }

    #[test]
    fn test_unterminated_reference() {
        let err = parse("echo ${{ a").unwrap_err();
        assert!(matches!(
            err,
            SyntaxError::UnterminatedReference { position: 5, .. }
        ));
    }

    #[test]
    fn test_empty_and_invalid_references() {
        assert!(matches!(
            parse("${{ }}"),
            Err(SyntaxError::EmptyReference { .. })
        ));
        for bad in ["${{ a..b }}", "${{ .a }}", "${{ a. }}", "${{ 1a }}", "${{ a b }}"] {
            assert!(
                matches!(parse(bad), Err(SyntaxError::InvalidReference { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_unicode_text() {
        assert!(matches!(
            parse("héllo ${{ wörld }}"),
            Err(SyntaxError::InvalidReference { .. })
        ));
        assert_eq!(
            parse("ünï $X").unwrap(),
            vec![text("ünï "), Token::EnvironmentVariable("X".to_string())]
        );
    }

    #[test]
    fn test_cached_parser() {
        let parser = Parser::new(2);
        let first = parser.parse("echo ${{ a }}").unwrap();
        let second = parser.parse("echo ${{ a }}").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(parser.parse("${{").is_err());
        assert_eq!(parser.cached(), 1);
    }

    proptest! {
        #[test]
        fn prop_render_round_trip(input in r"[a-z $\\{}._-]{0,40}") {
            if let Ok(tokens) = parse(&input) {
                let reparsed = parse(&render(&tokens)).unwrap();
                prop_assert_eq!(reparsed, tokens);
            }
        }

        #[test]
        fn prop_render_round_trip_references(
            parts in proptest::collection::vec(
                prop_oneof![
                    "[a-z ]{1,5}".prop_map(Token::Text),
                    "[a-z_][a-z0-9_]{0,4}".prop_map(Token::Variable),
                    "[A-Z_][A-Z0-9_]{0,4}".prop_map(Token::EnvironmentVariable),
                ],
                0..8,
            )
        ) {
            let input = render(&parts);
            let tokens = parse(&input).unwrap();
            prop_assert_eq!(parse(&render(&tokens)).unwrap(), tokens);
        }
    }
}
