//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig, DEBUG_LOG_FILTER, DEFAULT_LOG_FILTER};

/// Filter directive for a run.
///
/// Priority: explicit level > `RUST_LOG` > default. `debug` swaps the default
/// for the debug filter; `warn` adds a global `warn` directive so other
/// crates' warnings are reported too.
pub fn log_filter(debug: bool, warn: bool, level: Option<&str>, rust_log: Option<String>) -> String {
    let base = if debug { DEBUG_LOG_FILTER } else { DEFAULT_LOG_FILTER };
    let filter = level
        .map(str::to_string)
        .or(rust_log)
        .unwrap_or_else(|| base.to_string());
    if warn {
        format!("warn,{}", filter)
    } else {
        filter
    }
}

/// Install the global subscriber, writing to stderr. Fails if one is already
/// installed.
pub fn init_tracing(debug: bool, warn: bool, logging: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = log_filter(
        debug,
        warn,
        logging.level.as_deref(),
        std::env::var("RUST_LOG").ok(),
    );

    // stdout belongs to the response under the cgi adapter
    let registry = tracing_subscriber::registry().with(EnvFilter::new(&filter));
    match logging.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}
