//! Configuration management
//!
//! Defaults, overlaid by `PIPELINER_*` environment variables, overlaid by
//! command line flags.

use crate::resolver::DEFAULT_PARSE_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::time::Duration;

/// Enables trace logging
pub const ENV_TRACE: &str = "PIPELINER_TRACE";
/// Prefixes console lines with a timestamp
pub const ENV_TIMESTAMPS: &str = "PIPELINER_TIMESTAMPS";
/// Log level when `RUST_LOG` is unset
pub const ENV_LOG_LEVEL: &str = "PIPELINER_LOG_LEVEL";
/// Console output format, `text` or `json`
pub const ENV_OUTPUT: &str = "PIPELINER_OUTPUT";

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `@step ... status=[success]` lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level
    pub log_level: String,
    /// Trace resolution, argv and IPC traffic
    pub trace: bool,
    /// Prefix console lines with a timestamp
    pub timestamps: bool,
    /// Console output format
    pub output: OutputFormat,
    /// Parse cache entries
    pub parse_cache_capacity: usize,
    /// Extension cache entries
    pub extension_cache_capacity: usize,
    /// How long to wait for a killed process to exit
    pub kill_grace_period_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            trace: false,
            timestamps: false,
            output: OutputFormat::Text,
            parse_cache_capacity: DEFAULT_PARSE_CACHE_CAPACITY,
            extension_cache_capacity: 32,
            kill_grace_period_ms: 5_000,
        }
    }
}

/// Collects `vars` into a map, dropping entries that are not valid UTF-8
pub fn utf8_environment(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let key = key.unwrap_or_else(|k| k.to_string_lossy().into_owned());
                tracing::warn!(variable = %key, "ignoring environment variable that is not valid UTF-8");
                None
            }
        })
        .collect()
}

fn flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

impl Config {
    /// Defaults overlaid by the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay(&utf8_environment(std::env::vars_os()))
    }

    /// Overlays `PIPELINER_*` entries of `environment`
    #[must_use]
    pub fn overlay(mut self, environment: &HashMap<String, String>) -> Self {
        if let Some(value) = environment.get(ENV_TRACE) {
            self.trace = flag(value);
        }
        if let Some(value) = environment.get(ENV_TIMESTAMPS) {
            self.timestamps = flag(value);
        }
        if let Some(value) = environment.get(ENV_LOG_LEVEL) {
            self.log_level = value.clone();
        }
        if let Some(value) = environment.get(ENV_OUTPUT) {
            match value.to_ascii_lowercase().as_str() {
                "json" => self.output = OutputFormat::Json,
                "text" => self.output = OutputFormat::Text,
                other => tracing::warn!(value = %other, "ignoring unknown {ENV_OUTPUT}"),
            }
        }
        self
    }

    /// Level handed to the log filter
    #[must_use]
    pub fn effective_log_level(&self) -> &str {
        if self.trace { "trace" } else { &self.log_level }
    }

    /// Grace period after a forced kill
    #[must_use]
    pub fn kill_grace_period(&self) -> Duration {
        Duration::from_millis(self.kill_grace_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.trace);
        assert_eq!(config.output, OutputFormat::Text);
        assert_eq!(config.parse_cache_capacity, 1000);
        assert_eq!(config.kill_grace_period(), Duration::from_secs(5));
    }

    #[test]
    fn test_overlay_environment() {
        let environment: HashMap<String, String> = [
            (ENV_TRACE.to_string(), "1".to_string()),
            (ENV_TIMESTAMPS.to_string(), "TRUE".to_string()),
            (ENV_OUTPUT.to_string(), "json".to_string()),
        ]
        .into();
        let config = Config::default().overlay(&environment);
        assert!(config.trace);
        assert!(config.timestamps);
        assert_eq!(config.output, OutputFormat::Json);
        assert_eq!(config.effective_log_level(), "trace");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;
        let environment = utf8_environment([
            (OsString::from("GOOD"), OsString::from("yes")),
            (OsString::from("BAD"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from_vec(vec![0xff]), OsString::from("x")),
        ]);
        assert_eq!(environment, HashMap::from([("GOOD".to_string(), "yes".to_string())]));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: Config = serde_json::from_str(r#"{"trace": true}"#).unwrap();
        assert!(config.trace);
        assert_eq!(config.log_level, "info");
    }
}
