//! Substitution language
//!
//! Commands, environment values, property values and working directories
//! may reference properties with `${{ name }}` / `${{ scope.name }}` and
//! environment variables with `$NAME`. This module tokenizes those strings,
//! resolves them to a fixpoint, and layers pipeline, job and step scopes.

mod parser;
mod resolve;
pub mod scope;
mod token;

pub use parser::{DEFAULT_PARSE_CACHE_CAPACITY, Parser, parse};
pub use resolve::{MAX_PASSES, Resolver, Substitution, resolve, resolve_all};
pub use scope::{LEGACY_PREFIX, ScopeLayer, ScopePath, merge_environment, merge_properties};
pub use token::{
    Token, is_valid_environment_name, is_valid_id, is_valid_property_key,
    is_valid_property_name, render,
};

/// String-to-string map used for properties and environment variables
pub type PropertyMap = std::collections::HashMap<String, String>;
