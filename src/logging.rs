//! Tracing subscriber setup for the `tsb` binary.
//!
//! Human-readable lines go to stderr. When `log-file` is enabled, JSON lines
//! are also appended to `tsb.log` in the data directory through a
//! non-blocking writer whose guard must live as long as the process.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "TSUBAME_LOG";

/// File name of the JSON log inside the data directory.
pub const LOG_FILE_NAME: &str = "tsb.log";

/// Build the filter: `TSUBAME_LOG` if set and valid, otherwise `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::resolver::DEFAULT_LOG_LEVEL))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is on. Installing twice
/// is harmless; the second call keeps the first subscriber.
pub fn init(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("tsb: cannot create log directory {}: {}", dir.display(), e);
                (None, None)
            } else {
                let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_current_span(false);
                (Some(layer), Some(guard))
            }
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    guard
}
