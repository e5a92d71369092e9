use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG: &str = "CANTORAL_LOG";
pub const ENV_LOG_DIR: &str = "CANTORAL_LOG_DIR";
pub const DEFAULT_FILTER: &str = "cantoral=info,sqlx=warn";
const LOG_FILE_PREFIX: &str = "cantoral.log";

/// Keeps the background file writer alive. Dropping it flushes pending lines.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs JSON logging to stderr, plus a daily rotated file when
/// `CANTORAL_LOG_DIR` is set. Safe to call more than once; later calls leave
/// the first subscriber in place.
pub fn init_logging() -> LoggingGuard {
    let directives = std::env::var(ENV_LOG).unwrap_or_else(|_| DEFAULT_FILTER.into());
    let log_dir = std::env::var(ENV_LOG_DIR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    init_with(&directives, log_dir.as_deref())
}

pub fn init_with(directives: &str, log_dir: Option<&Path>) -> LoggingGuard {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    LoggingGuard { _file: guard }
}
