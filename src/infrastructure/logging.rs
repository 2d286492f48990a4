//! Logging configuration
//!
//! Diagnostics go to stderr so they never interleave with the console
//! protocol on stdout. `RUST_LOG` takes precedence over the configured
//! level. In trace mode the subscriber also prints module targets, thread
//! ids and the elapsed time of every node span.

use super::config::Config;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

/// Log filter for `config`
#[must_use]
pub fn log_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.effective_log_level()))
}

/// Installs the global subscriber
///
/// Returns false if a subscriber was already installed.
pub fn init_logging(config: &Config) -> bool {
    let builder = fmt()
        .with_env_filter(log_filter(config))
        .with_writer(std::io::stderr)
        .with_line_number(true);

    let installed = if config.trace {
        builder
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
    } else {
        builder.with_target(false).compact().try_init()
    };
    installed.is_ok()
}
