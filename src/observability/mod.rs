//! Structured logging setup.
//!
//! Console output is pretty-printed for development or JSON for log
//! aggregation; an optional daily-rotated file always receives JSON.
//!
//! # Environment Configuration
//!
//! ```bash
//! # Component-specific levels
//! RUST_LOG=solana_pool_indexer=debug,sqlx=warn solana-pool-indexer scan
//!
//! # JSON console output
//! LOG_JSON=true solana-pool-indexer scan --follow
//!
//! # Also write logs to ./logs/indexer.log.YYYY-MM-DD
//! LOG_FILE=./logs/indexer.log solana-pool-indexer scan
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{IndexerError, IndexerResult};

/// Filter used when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_FILTER: &str = "solana_pool_indexer=info,warn";

/// Logging settings read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Level or filter directive overriding the default
    pub level: Option<String>,
    /// File receiving JSON logs, rotated daily
    pub file: Option<PathBuf>,
    /// JSON instead of pretty console output
    pub json: bool,
}

impl LogSettings {
    /// Read `LOG_FILE` and `LOG_JSON`. `RUST_LOG` is consulted at init time.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            level: None,
            file: std::env::var("LOG_FILE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            json: std::env::var("LOG_JSON")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `settings.level`, which wins over
/// [`DEFAULT_FILTER`]. The returned guard flushes the file writer when
/// dropped, so the caller keeps it alive for the whole run.
///
/// # Errors
///
/// Returns a configuration error if the log directory cannot be created or
/// a subscriber is already installed.
pub fn init_tracing(settings: &LogSettings) -> IndexerResult<Option<WorkerGuard>> {
    let env_filter = build_filter(std::env::var("RUST_LOG").ok(), settings.level.as_deref());

    let console_layer = if settings.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().pretty().with_target(true).with_thread_ids(true).boxed()
    };

    let (file_layer, guard) = match &settings.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir).map_err(|e| {
                IndexerError::config(format!("Cannot create log directory {}", dir.display()), Some(Box::new(e)))
            })?;

            let appender = tracing_appender::rolling::daily(
                dir,
                path.file_name().unwrap_or_else(|| OsStr::new("indexer.log")),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| IndexerError::config("Tracing already initialized", Some(Box::new(e))))?;

    info!(
        json_output = settings.json,
        file_logging = settings.file.is_some(),
        "Tracing initialized"
    );

    Ok(guard)
}

fn build_filter(rust_log: Option<String>, level: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|f| !f.trim().is_empty())
        .or_else(|| level.map(str::to_string))
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Test subscriber writing through the test harness.
///
/// Use with `cargo test -- --nocapture` to see scan logs.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        assert_eq!(build_filter(None, None).to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
        let same = |a: EnvFilter, b: &str| assert_eq!(a.to_string(), EnvFilter::new(b).to_string());
        same(build_filter(None, Some("debug")), "debug");
        same(build_filter(Some("trace".into()), Some("debug")), "trace");
        same(build_filter(Some("  ".into()), Some("warn")), "warn");
    }

    #[test]
    fn test_second_init_is_an_error() {
        init_test_tracing();
        let result = init_tracing(&LogSettings::default());
        assert!(matches!(result, Err(IndexerError::ConfigError { .. })));
    }
}
