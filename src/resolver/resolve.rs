//! Fixpoint resolver
//!
//! Substitutes property and environment tokens, re-tokenizing the result
//! until it stops changing. Missing keys leave the token text in place so
//! a later pass can still pick them up.

use super::parser::Parser;
use super::scope::ScopePath;
use super::token::Token;
use super::PropertyMap;
use crate::pipeline::{ExecutionError, ReferenceKind};

/// Upper bound on substitution passes; a reference cycle never converges
pub const MAX_PASSES: usize = 64;

const ESCAPED_OPEN: &str = "\\${{";

/// Which token kinds a resolver substitutes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substitution {
    /// Properties and environment variables
    All,
    /// Properties only; `$NAME` is left for the shell
    PropertiesOnly,
}

/// Resolves tokens against a property map and an environment map
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    parser: &'a Parser,
    properties: &'a PropertyMap,
    environment: &'a PropertyMap,
    scope: Option<&'a ScopePath>,
    substitution: Substitution,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver substituting both token kinds, without scope
    #[must_use]
    pub fn new(
        parser: &'a Parser,
        properties: &'a PropertyMap,
        environment: &'a PropertyMap,
    ) -> Self {
        Self {
            parser,
            properties,
            environment,
            scope: None,
            substitution: Substitution::All,
        }
    }

    /// Looks unscoped property names up through `scope` first
    #[must_use]
    pub fn scoped(mut self, scope: &'a ScopePath) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Sets which token kinds are substituted
    #[must_use]
    pub fn substitution(mut self, substitution: Substitution) -> Self {
        self.substitution = substitution;
        self
    }

    /// Single substitution pass
    #[must_use]
    pub fn resolve(&self, tokens: &[Token]) -> String {
        let mut out = String::new();
        for token in tokens {
            match self.lookup(token) {
                Some(value) => out.push_str(value),
                None => out.push_str(&token.to_string()),
            }
        }
        out
    }

    /// Resolves `input` to a fixpoint and checks nothing is left over
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::UnresolvedReference`] when a substituted
    /// token kind survives, and [`ExecutionError::Syntax`] when an
    /// intermediate string no longer tokenizes.
    pub fn resolve_all(&self, input: &str) -> Result<String, ExecutionError> {
        let mut current = input.to_string();

        for pass in 1..=MAX_PASSES {
            let tokens = self.parser.parse(&current)?;
            let next = self.resolve(&tokens);
            if next == current {
                break;
            }
            if pass == MAX_PASSES {
                tracing::warn!(input = %input, "resolution did not converge");
            }
            current = next;
        }

        let tokens = self.parser.parse(&current)?;
        if let Some(token) = tokens.iter().find(|t| self.substitutes(t)) {
            return Err(unresolved(token));
        }

        Ok(current.replace(ESCAPED_OPEN, "${{"))
    }

    fn substitutes(&self, token: &Token) -> bool {
        match token {
            Token::Text(_) => false,
            Token::EnvironmentVariable(_) => self.substitution == Substitution::All,
            Token::Variable(_) | Token::ScopedVariable { .. } => true,
        }
    }

    fn lookup(&self, token: &Token) -> Option<&'a str> {
        if !self.substitutes(token) {
            return None;
        }
        match token {
            Token::Variable(name) => {
                let value = match self.scope {
                    Some(scope) => scope
                        .aliases(name)
                        .iter()
                        .find_map(|key| self.properties.get(key)),
                    None => self.properties.get(name),
                };
                value.map(String::as_str)
            }
            Token::ScopedVariable { .. } => token
                .key()
                .and_then(|key| self.properties.get(&key))
                .map(String::as_str),
            Token::EnvironmentVariable(name) => self.environment.get(name).map(String::as_str),
            Token::Text(_) => None,
        }
    }
}

fn unresolved(token: &Token) -> ExecutionError {
    let kind = match token {
        Token::ScopedVariable { .. } => ReferenceKind::ScopedProperty,
        Token::EnvironmentVariable(_) => ReferenceKind::EnvironmentVariable,
        Token::Variable(_) | Token::Text(_) => ReferenceKind::Property,
    };
    ExecutionError::UnresolvedReference {
        kind,
        name: token.key().unwrap_or_default(),
    }
}

/// Single-pass substitution without scope
#[must_use]
pub fn resolve(tokens: &[Token], properties: &PropertyMap, environment: &PropertyMap) -> String {
    let parser = Parser::new(1);
    Resolver::new(&parser, properties, environment).resolve(tokens)
}

/// Fixpoint resolution of both token kinds without scope
///
/// # Errors
///
/// See [`Resolver::resolve_all`].
///
/// # Example
///
/// ```rust
/// use pipeliner::resolver::{PropertyMap, resolve_all};
///
/// let mut properties = PropertyMap::new();
/// properties.insert("greeting".to_string(), "hello ${{ who }}".to_string());
/// properties.insert("who".to_string(), "world".to_string());
///
/// let resolved = resolve_all("${{ greeting }}", &properties, &PropertyMap::new()).unwrap();
/// assert_eq!(resolved, "hello world");
/// ```
pub fn resolve_all(
    input: &str,
    properties: &PropertyMap,
    environment: &PropertyMap,
) -> Result<String, ExecutionError> {
    let parser = Parser::new(MAX_PASSES);
    Resolver::new(&parser, properties, environment).resolve_all(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::parse;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn map(entries: &[(&str, &str)]) -> PropertyMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_single_pass_leaves_missing_tokens() {
        let tokens = parse("${{ a }} ${{ b }} $HOME $NOPE").unwrap();
        let out = resolve(
            &tokens,
            &map(&[("a", "1")]),
            &map(&[("HOME", "/root")]),
        );
        assert_eq!(out, "1 ${{ b }} /root $NOPE");
    }

    #[test]
    fn test_fixpoint_chain() {
        let properties = map(&[("a", "${{ b }}"), ("b", "${{ c }}"), ("c", "$USER")]);
        let env = map(&[("USER", "ci")]);
        assert_eq!(resolve_all("x=${{ a }}", &properties, &env).unwrap(), "x=ci");
    }

    #[test]
    fn test_unresolved_property() {
        let err = resolve_all("${{ missing }}", &PropertyMap::new(), &PropertyMap::new())
            .unwrap_err();
        assert_eq!(
            err,
            ExecutionError::UnresolvedReference {
                kind: ReferenceKind::Property,
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_unresolved_environment_and_scoped() {
        let err = resolve_all("$NOPE", &PropertyMap::new(), &PropertyMap::new()).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::UnresolvedReference {
                kind: ReferenceKind::EnvironmentVariable,
                ..
            }
        ));

        let err =
            resolve_all("${{ job.x }}", &PropertyMap::new(), &PropertyMap::new()).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::UnresolvedReference {
                kind: ReferenceKind::ScopedProperty,
                name: "job.x".to_string()
            }
        );
    }

    #[test]
    fn test_cycle_is_unresolved() {
        let properties = map(&[("a", "${{ b }}"), ("b", "${{ a }}")]);
        let err = resolve_all("${{ a }}", &properties, &PropertyMap::new()).unwrap_err();
        assert!(matches!(err, ExecutionError::UnresolvedReference { .. }));

        let growing = map(&[("a", "x${{ a }}")]);
        assert!(resolve_all("${{ a }}", &growing, &PropertyMap::new()).is_err());
    }

    #[test]
    fn test_properties_only_keeps_environment() {
        let parser = Parser::default();
        let properties = map(&[("n", "3")]);
        let env = PropertyMap::new();
        let resolver =
            Resolver::new(&parser, &properties, &env).substitution(Substitution::PropertiesOnly);
        assert_eq!(
            resolver
                .resolve_all("for i in $(seq ${{ n }}); do echo $i; done")
                .unwrap(),
            "for i in $(seq 3); do echo $i; done"
        );
    }

    #[test]
    fn test_escaped_reference_is_unescaped_once() {
        let out = resolve_all(r"echo \${{ a }} \$HOME", &map(&[("a", "1")]), &PropertyMap::new())
            .unwrap();
        assert_eq!(out, r"echo ${{ a }} \$HOME");
    }

    #[test]
    fn test_scope_precedence() {
        let parser = Parser::default();
        let scope = ScopePath::default()
            .child(Some("p"))
            .child(Some("j"))
            .child(Some("s"));
        let properties = map(&[("n", "bare"), ("j.n", "job"), ("s.n", "step")]);
        let env = PropertyMap::new();
        let resolver = Resolver::new(&parser, &properties, &env).scoped(&scope);
        assert_eq!(resolver.resolve_all("${{ n }}").unwrap(), "step");
        assert_eq!(resolver.resolve_all("${{ j.n }}").unwrap(), "job");
    }

    #[test]
    fn test_substituted_value_with_bad_syntax_fails() {
        let properties = map(&[("a", "${{ oops")]);
        let err = resolve_all("${{ a }}", &properties, &PropertyMap::new()).unwrap_err();
        assert!(matches!(err, ExecutionError::Syntax(_)));
    }

    proptest! {
        #[test]
        fn prop_resolve_is_idempotent(
            input in r"[a-z ]{0,6}(\$\{\{ [abc] \}\}|\$[XYZ])?( [a-z]{0,5})?",
        ) {
            let properties = map(&[("a", "1"), ("b", "${{ a }}"), ("c", "$X")]);
            let env = map(&[("X", "x"), ("Y", "y"), ("Z", "z")]);
            let once = resolve_all(&input, &properties, &env).unwrap();
            let twice = resolve_all(&once, &properties, &env).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
