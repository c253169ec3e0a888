use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::utils::error::{Result, SentinelError};

// Constants for logging configuration
const DEFAULT_DIRECTIVE: &str = "info";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "sentinel.log";

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Env-filter directive, e.g. `info` or `sentinel=debug,warn`.
    pub directive: String,
    /// Emit one JSON object per event instead of the human format.
    pub json: bool,
    /// Also write to a daily-rotated file under `log_dir`.
    pub file_output: bool,
    pub log_dir: String,
    pub file_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directive: DEFAULT_DIRECTIVE.to_string(),
            json: false,
            file_output: false,
            log_dir: DEFAULT_LOG_DIR.to_string(),
            file_name: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured directive. Returns the appender guard
/// when file output is enabled; dropping it flushes buffered log lines, so
/// the caller should hold it for the process lifetime.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.directive))
        .map_err(|e| SentinelError::config(format!("invalid log directive: {e}")))?;

    let stdout_layer = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let (file_layer, guard) = if config.file_output {
        let appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &config.file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().json().with_writer(writer).boxed()),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SentinelError::config(format!("tracing init failed: {e}")))?;

    info!(
        directive = %config.directive,
        json = config.json,
        file_output = config.file_output,
        "logging initialized"
    );
    Ok(guard)
}
