//! Logging bootstrap for the gateway services
//!
//! Console output uses a bracketed level format, an optional daily rolling
//! file layer is written through a non-blocking appender, and the active
//! filter can be swapped at runtime through a reload handle.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging bootstrap errors
#[derive(Error, Debug)]
pub enum LoggingError {
    /// Filter directive could not be parsed
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// Log directory could not be prepared
    #[error("Log directory error: {0}")]
    Directory(#[from] std::io::Error),

    /// Subscriber already installed or reload handle missing
    #[error("Logging state error: {0}")]
    State(String),
}

/// Logging section of the service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for rolling log files; console only when absent
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// File name prefix for the rolling files
    #[serde(default = "default_file_prefix")]
    pub file: String,
    /// Colored console output
    #[serde(default = "default_true")]
    pub ansi: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "s7gw.log".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
            file: default_file_prefix(),
            ansi: true,
        }
    }
}

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `timestamp [LEVEL] target: message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] s7gw::session: PLC connected`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        write!(writer, "{}: ", event.metadata().target())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

// Keeps the non-blocking file writer alive for the process lifetime
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();
static CURRENT_FILTER: OnceLock<Mutex<String>> = OnceLock::new();

fn parse_filter(filter: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(filter).map_err(|e| LoggingError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Calling this twice
/// returns [`LoggingError::State`].
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());
    let (filter, handle) = reload::Layer::new(parse_filter(&filter_str)?);

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &config.file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if FILE_GUARD.set(guard).is_err() {
                return Err(LoggingError::State("file logger already installed".into()));
            }
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed(),
            )
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::State(e.to_string()))?;

    let _ = FILTER_HANDLE.set(handle);
    let _ = CURRENT_FILTER.set(Mutex::new(filter_str.clone()));

    tracing::info!(filter = %filter_str, dir = ?config.dir, "Logging initialized");
    Ok(())
}

/// Swap the active filter at runtime
///
/// Accepts a level (`"debug"`) or a full directive (`"info,s7gw=trace"`).
pub fn set_log_level(filter: &str) -> Result<(), LoggingError> {
    let new_filter = parse_filter(filter)?;
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| LoggingError::State("logging not initialized".into()))?;

    handle
        .reload(new_filter)
        .map_err(|e| LoggingError::State(e.to_string()))?;

    if let Some(current) = CURRENT_FILTER.get() {
        if let Ok(mut guard) = current.lock() {
            *guard = filter.to_string();
        }
    }

    tracing::info!("Log level changed to: {}", filter);
    Ok(())
}

/// Currently active filter directive
pub fn current_log_level() -> String {
    CURRENT_FILTER
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Map a numeric debug level (1..=3) to a filter directive
///
/// Panels and SCADA hosts expose verbosity as a small integer; 1 is normal
/// operation, 3 is full protocol tracing.
pub fn level_for_debug(level: i16) -> Option<&'static str> {
    match level {
        1 => Some("info"),
        2 => Some("debug"),
        3 => Some("trace"),
        _ => None,
    }
}
