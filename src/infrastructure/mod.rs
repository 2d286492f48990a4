//! Infrastructure layer
//!
//! This module contains configuration, logging and the adapters the
//! executor talks to.

pub mod cache;
mod config;
pub mod extension;
mod logging;

pub use cache::LruCache;
pub use config::{
    Config, ENV_LOG_LEVEL, ENV_OUTPUT, ENV_TIMESTAMPS, ENV_TRACE, OutputFormat, utf8_environment,
};
pub use extension::{
    Checksum, ENTRY_SCRIPT, ExtensionResolver, LocalExtensionResolver, parse_extension_arguments,
};
pub use logging::{init_logging, log_filter};
