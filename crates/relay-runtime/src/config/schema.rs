//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use relay_core::DuplicateResolution;
use relay_processor::{ErrorMode, InitialPosition, TrackingProcessorConfig};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Command bus settings.
    #[serde(default)]
    pub command_bus: CommandBusConfig,

    /// Query bus settings.
    #[serde(default)]
    pub query_bus: QueryBusConfig,

    /// Event store settings.
    #[serde(default)]
    pub event_store: EventStoreConfig,

    /// Token store settings.
    #[serde(default)]
    pub token_store: TokenStoreConfig,

    /// Tracking processors by name.
    #[serde(default)]
    pub processors: BTreeMap<String, ProcessorConfig>,
}

impl RelayConfig {
    /// Returns the runtime settings of processor `name`, falling back to the
    /// defaults for processors without a section.
    pub fn processor(&self, name: &str) -> TrackingProcessorConfig {
        self.processors
            .get(name)
            .cloned()
            .unwrap_or_default()
            .to_processor_config(&self.event_store)
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// When the log file is rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids in log lines.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file names and line numbers in log lines.
    #[serde(default)]
    pub file_location: bool,

    /// Log file, required when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Maximum number of rotated log files kept.
    #[serde(default = "default_max_files")]
    pub max_files: u32,

    /// Per-module levels, e.g. `relay_processor = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::default(),
            max_files: default_max_files(),
            filters: BTreeMap::new(),
        }
    }
}

fn default_max_files() -> u32 {
    5
}

// =============================================================================
// Buses and Stores
// =============================================================================

/// Command bus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandBusConfig {
    /// What happens when a second handler subscribes to a command name.
    #[serde(default)]
    pub duplicate_resolution: DuplicateResolution,

    /// Run command handlers on their own task.
    #[serde(default)]
    pub spawn_handlers: bool,
}

/// Query bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryBusConfig {
    /// Scatter-gather timeout per handler in milliseconds.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
}

impl Default for QueryBusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: default_handler_timeout_ms(),
        }
    }
}

impl QueryBusConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

fn default_handler_timeout_ms() -> u64 {
    5000
}

/// Event store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStoreConfig {
    /// Suppress event types no handler subscribes to. Processors may
    /// override this.
    #[serde(default = "default_true")]
    pub blacklisting: bool,

    /// How long an event type stays suppressed, in milliseconds.
    #[serde(default = "default_suppression_refresh_ms")]
    pub suppression_refresh_ms: u64,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            blacklisting: true,
            suppression_refresh_ms: default_suppression_refresh_ms(),
        }
    }
}

impl EventStoreConfig {
    pub fn suppression_refresh(&self) -> Duration {
        Duration::from_millis(self.suppression_refresh_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_suppression_refresh_ms() -> u64 {
    5000
}

/// Token store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStoreConfig {
    /// Time after which an unrefreshed claim may be taken over, in
    /// milliseconds.
    #[serde(default = "default_claim_timeout_ms")]
    pub claim_timeout_ms: u64,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            claim_timeout_ms: default_claim_timeout_ms(),
        }
    }
}

impl TokenStoreConfig {
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }
}

fn default_claim_timeout_ms() -> u64 {
    10_000
}

// =============================================================================
// Processors
// =============================================================================

/// Settings of one tracking event processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Segments created on first start. Must be a power of two.
    #[serde(default = "default_segment_count")]
    pub initial_segment_count: u32,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_claim_interval_ms")]
    pub claim_interval_ms: u64,

    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub initial_position: InitialPosition,

    /// Overrides `event_store.blacklisting` for this processor.
    #[serde(default)]
    pub blacklisting: Option<bool>,

    #[serde(default)]
    pub error_mode: ErrorMode,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            initial_segment_count: default_segment_count(),
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            claim_interval_ms: default_claim_interval_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            initial_position: InitialPosition::default(),
            blacklisting: None,
            error_mode: ErrorMode::default(),
        }
    }
}

impl ProcessorConfig {
    /// Converts to the processor's runtime settings.
    pub fn to_processor_config(&self, event_store: &EventStoreConfig) -> TrackingProcessorConfig {
        TrackingProcessorConfig {
            initial_segment_count: self.initial_segment_count,
            max_workers: self.max_workers,
            batch_size: self.batch_size,
            claim_interval: Duration::from_millis(self.claim_interval_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            initial_position: self.initial_position,
            blacklisting: self.blacklisting.unwrap_or(event_store.blacklisting),
            error_mode: self.error_mode,
        }
    }
}

fn default_segment_count() -> u32 {
    1
}

fn default_max_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    32
}

fn default_claim_interval_ms() -> u64 {
    500
}

fn default_idle_poll_ms() -> u64 {
    250
}

fn default_retry_backoff_ms() -> u64 {
    1000
}
