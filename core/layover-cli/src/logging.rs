//! Two sinks: terse stderr for the user, a daily-rolling debug file for post-mortems.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEBUG_ENV: &str = "LAYOVER_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "layover.log";

/// Installs the global subscriber. The returned guard flushes the file sink on drop
/// and must be held by `main`.
pub fn init(logs_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let stderr_filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" }))
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    // Logging must never stop the tool from running.
    let (file_layer, guard) = match fs_err::create_dir_all(logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}

fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
