//! Tracing initialization.
//!
//! Structured logging through `tracing` and `tracing-subscriber`:
//! - Multiple output formats (pretty, compact, JSON)
//! - Environment-based filtering (`RUST_LOG` wins over the configured level)
//! - Thread names in every line, so `Cam_<index>` threads are easy to follow
//!
//! Logs always go to stderr. Stdout belongs to the console and, in worker mode, to
//! the status stream read by the parent process.
//!
//! # Example
//! ```no_run
//! use twv_daq::{config::DaqConfig, tracing_setup};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DaqConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! info!(camera = 0, "Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::DaqConfig;
use crate::error::{AppResult, DaqError};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (development)
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event (log aggregation)
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Most verbose level emitted
    pub level: Level,
    /// Output layout
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// Include the thread name (e.g. `Cam_0`)
    pub with_thread_names: bool,
    /// ANSI colors (Pretty only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Defaults at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level and format from the `[application]` table.
    pub fn from_daq_config(config: &DaqConfig) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: parse_output_format(&config.application.log_format)?,
            ..Default::default()
        })
    }

    /// Set the output layout.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Toggle span NEW/CLOSE events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Toggle source locations.
    pub fn with_file_and_line(mut self, enabled: bool) -> Self {
        self.with_file_and_line = enabled;
        self
    }

    /// Toggle ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the loaded configuration.
pub fn init_from_config(config: &DaqConfig) -> AppResult<()> {
    init(TracingConfig::from_daq_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed this returns `Ok(())`, which
/// keeps it safe to call from tests.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().with_ansi(false).boxed(),
    };

    let result = tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init();

    match result {
        Ok(()) => Ok(()),
        // Already initialized: expected in tests and when embedding
        Err(e) if e.to_string().contains("already") => Ok(()),
        Err(e) => Err(DaqError::Configuration(format!(
            "Failed to initialize tracing: {}",
            e
        ))),
    }
}

fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DaqError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

fn parse_output_format(format: &str) -> AppResult<OutputFormat> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        _ => Err(DaqError::Configuration(format!(
            "Invalid log format '{}'. Must be one of: pretty, compact, json",
            format
        ))),
    }
}
