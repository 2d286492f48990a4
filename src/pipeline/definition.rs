//! YAML pipeline definitions
//!
//! A document has a single `pipeline:` root:
//!
//! ```yaml
//! pipeline:
//!   name: Build
//!   id: build
//!   with:
//!     greeting: hello
//!   jobs:
//!     - name: Job
//!       id: job
//!       steps:
//!         - name: Step
//!           id: step
//!           shell: bash
//!           run: |
//!             echo ${{ greeting }}
//!             echo done > $RESULT
//! ```
//!
//! `env` and `with` values may be any YAML scalar and are stringified;
//! `enabled` may be a boolean or a string and is decoded during validation.

use super::errors::PipelineError;
use super::pipeline_def::Pipeline;
use super::steps::parse_run_block;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PipelineDocument {
    pipeline: Pipeline,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::String(value) => value,
        }
    }
}

pub(crate) fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
}

pub(crate) fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = Option::<BTreeMap<String, Option<Scalar>>>::deserialize(deserializer)?;
    Ok(map
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.map(Scalar::into_string).unwrap_or_default()))
        .collect())
}

pub(crate) fn run_block<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let block = Option::<String>::deserialize(deserializer)?;
    Ok(block.as_deref().map(parse_run_block).unwrap_or_default())
}

/// Parses a pipeline document from YAML text
///
/// The result is not validated; see [`Validate`](super::Validate).
///
/// # Errors
///
/// Returns [`PipelineError::Load`] if the text is not a pipeline document.
pub fn parse_pipeline(yaml: &str) -> Result<Pipeline, PipelineError> {
    parse_document(yaml, "<inline>")
}

/// Reads and parses a pipeline document
///
/// # Errors
///
/// Returns [`PipelineError::Load`] if the file cannot be read or parsed.
pub fn load_pipeline(path: &Path) -> Result<Pipeline, PipelineError> {
    let shown = path.display().to_string();
    tracing::debug!(path = %shown, "Loading pipeline");

    let yaml = std::fs::read_to_string(path).map_err(|e| PipelineError::Load {
        path: shown.clone(),
        reason: e.to_string(),
    })?;
    parse_document(&yaml, &shown)
}

fn parse_document(yaml: &str, path: &str) -> Result<Pipeline, PipelineError> {
    serde_yaml::from_str::<PipelineDocument>(yaml)
        .map(|document| document.pipeline)
        .map_err(|e| PipelineError::Load {
            path: path.to_string(),
            reason: e.to_string(),
        })
}
