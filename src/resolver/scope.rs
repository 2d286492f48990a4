//! Scope merging
//!
//! A step sees the properties and environment variables of its pipeline,
//! job and itself, layered in that order with the last write winning.
//! Every property is also reachable through scope-qualified aliases
//! (`pipelineId.jobId.stepId.name`, `jobId.stepId.name`, `stepId.name`).

use super::PropertyMap;
use super::parser::Parser;
use super::resolve::Resolver;
use crate::pipeline::ExecutionError;
use std::collections::BTreeMap;

/// Prefix of the legacy property aliases written by captures and IPC imports
pub const LEGACY_PREFIX: &str = "INPUT_";

/// Ids of the enclosing nodes, outermost first
///
/// Nodes without an id do not contribute a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopePath {
    ids: Vec<String>,
}

impl ScopePath {
    /// Path one level deeper
    #[must_use]
    pub fn child(&self, id: Option<&str>) -> Self {
        let mut ids = self.ids.clone();
        if let Some(id) = id {
            ids.push(id.to_string());
        }
        Self { ids }
    }

    /// Ids, outermost first
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Keys for `name`, most specific first, ending with the bare name
    ///
    /// For ids `(p, j, s)` this is `p.j.s.name`, `j.s.name`, `s.name`, `name`.
    #[must_use]
    pub fn aliases(&self, name: &str) -> Vec<String> {
        let mut keys: Vec<String> = (0..self.ids.len())
            .map(|start| format!("{}.{name}", self.ids[start..].join(".")))
            .collect();
        keys.push(name.to_string());
        keys
    }

    /// [`aliases`](Self::aliases) plus an `INPUT_`-prefixed twin of each
    #[must_use]
    pub fn aliases_with_legacy(&self, name: &str) -> Vec<String> {
        self.aliases(name)
            .into_iter()
            .flat_map(|key| {
                let legacy = format!("{LEGACY_PREFIX}{key}");
                [key, legacy]
            })
            .collect()
    }
}

/// Properties declared by one node
#[derive(Debug, Clone, Copy)]
pub struct ScopeLayer<'a> {
    /// Node id, if any
    pub id: Option<&'a str>,
    /// The node's `with` block
    pub properties: &'a BTreeMap<String, String>,
    /// The node's `env` block
    pub environment: &'a BTreeMap<String, String>,
}

/// Builds the effective property map for the innermost layer
///
/// Static layers are applied outermost first, each under its scoped
/// aliases; `runtime` (captures, IPC imports, overrides) is applied last.
/// A bare run-time name is also written under the aliases of every
/// enclosing scope so it shadows each static value the step can reach.
#[must_use]
pub fn merge_properties(layers: &[ScopeLayer<'_>], runtime: &PropertyMap) -> PropertyMap {
    let mut merged = PropertyMap::new();
    let mut paths = Vec::with_capacity(layers.len());
    let mut path = ScopePath::default();

    for layer in layers {
        path = path.child(layer.id);
        for (name, value) in layer.properties {
            for key in path.aliases(name) {
                merged.insert(key, value.clone());
            }
        }
        paths.push(path.clone());
    }

    for (key, value) in runtime {
        if key.contains('.') || key.starts_with(LEGACY_PREFIX) {
            merged.insert(key.clone(), value.clone());
            continue;
        }
        merged.insert(key.clone(), value.clone());
        for alias in paths.iter().flat_map(|path| path.aliases(key)) {
            merged.insert(alias, value.clone());
        }
    }
    merged
}

/// Layers each node's `env` block over `base`, resolving values as it goes
///
/// A value may reference properties and any variable defined by an outer
/// layer or `base` (`PATH: $PATH:/opt/bin`).
///
/// # Errors
///
/// Returns the first resolution failure.
pub fn merge_environment(
    base: &PropertyMap,
    layers: &[ScopeLayer<'_>],
    parser: &Parser,
    properties: &PropertyMap,
    scope: &ScopePath,
) -> Result<PropertyMap, ExecutionError> {
    let mut merged = base.clone();

    for layer in layers {
        for (name, value) in layer.environment {
            let resolved = Resolver::new(parser, properties, &merged)
                .scoped(scope)
                .resolve_all(value)?;
            merged.insert(name.clone(), resolved);
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_aliases() {
        let path = ScopePath::default()
            .child(Some("p"))
            .child(None)
            .child(Some("s"));
        assert_eq!(path.aliases("n"), vec!["p.s.n", "s.n", "n"]);
        assert_eq!(
            path.aliases_with_legacy("n"),
            vec!["p.s.n", "INPUT_p.s.n", "s.n", "INPUT_s.n", "n", "INPUT_n"]
        );
    }

    #[test]
    fn test_merge_last_write_wins_with_aliases() {
        let empty = BTreeMap::new();
        let pipeline = tree(&[("n", "pipeline"), ("only_p", "1")]);
        let job = tree(&[("n", "job")]);
        let step = tree(&[("n", "step")]);
        let layers = [
            ScopeLayer { id: Some("p"), properties: &pipeline, environment: &empty },
            ScopeLayer { id: Some("j"), properties: &job, environment: &empty },
            ScopeLayer { id: Some("s"), properties: &step, environment: &empty },
        ];

        let merged = merge_properties(&layers, &PropertyMap::new());
        assert_eq!(merged["n"], "step");
        assert_eq!(merged["p.n"], "pipeline");
        assert_eq!(merged["j.n"], "job");
        assert_eq!(merged["p.j.n"], "job");
        assert_eq!(merged["p.j.s.n"], "step");
        assert_eq!(merged["only_p"], "1");
    }

    #[test]
    fn test_runtime_overrides_every_alias() {
        let empty = BTreeMap::new();
        let pipeline = tree(&[("x", "static")]);
        let step = tree(&[("y", "step")]);
        let layers = [
            ScopeLayer { id: Some("p"), properties: &pipeline, environment: &empty },
            ScopeLayer { id: Some("s"), properties: &step, environment: &empty },
        ];
        let runtime: PropertyMap = [
            ("x".to_string(), "captured".to_string()),
            ("other.y".to_string(), "qualified".to_string()),
        ]
        .into();

        let merged = merge_properties(&layers, &runtime);
        assert_eq!(merged["x"], "captured");
        assert_eq!(merged["p.x"], "captured");
        assert_eq!(merged["p.s.x"], "captured");
        assert_eq!(merged["p.s.y"], "step");
        assert_eq!(merged["s.x"], "captured");
        assert_eq!(merged["s.y"], "step");
        assert_eq!(merged["other.y"], "qualified");
        assert!(!merged.contains_key("s.other.y"));
    }

    #[test]
    fn test_merge_environment_resolves_against_outer_layers() {
        let empty = BTreeMap::new();
        let pipeline_env = tree(&[("TOOLS", "$HOME/tools")]);
        let step_env = tree(&[("PATH", "$TOOLS:$PATH"), ("MODE", "${{ mode }}")]);
        let layers = [
            ScopeLayer { id: Some("p"), properties: &empty, environment: &pipeline_env },
            ScopeLayer { id: Some("s"), properties: &empty, environment: &step_env },
        ];
        let base: PropertyMap = [
            ("HOME".to_string(), "/home/ci".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ]
        .into();
        let properties: PropertyMap = [("mode".to_string(), "fast".to_string())].into();

        let env = merge_environment(
            &base,
            &layers,
            &Parser::default(),
            &properties,
            &ScopePath::default(),
        )
        .unwrap();
        assert_eq!(env["TOOLS"], "/home/ci/tools");
        assert_eq!(env["PATH"], "/home/ci/tools:/usr/bin");
        assert_eq!(env["MODE"], "fast");
    }

    #[test]
    fn test_merge_environment_unresolved() {
        let empty = BTreeMap::new();
        let env = tree(&[("A", "$MISSING")]);
        let layers = [ScopeLayer { id: None, properties: &empty, environment: &env }];
        let result = merge_environment(
            &PropertyMap::new(),
            &layers,
            &Parser::default(),
            &PropertyMap::new(),
            &ScopePath::default(),
        );
        assert!(matches!(
            result,
            Err(ExecutionError::UnresolvedReference { .. })
        ));
    }
}
