//! Logging setup for Relay.
//!
//! Buses log dispatches at `debug`/`trace` and processors log lifecycle and
//! segment topology changes at `info`. A filter of `info` plus
//! `relay_processor=debug` shows claims, releases and the reasons a worker
//! stopped.
//!
//! ```rust,ignore
//! use relay_runtime::LoggingBuilder;
//! use relay_runtime::config::{LogLevel, SpanEventConfig};
//!
//! LoggingBuilder::new()
//!     .level(LogLevel::Info)
//!     .directive("relay_processor=debug")
//!     .span_events(SpanEventConfig { new: true, close: true, ..Default::default() })
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

/// Installs the global subscriber described by `config`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Builds the global `tracing` subscriber.
///
/// Starts from a [`LoggingConfig`] and accepts raw filter directives on
/// top of the configured per-module levels. `RUST_LOG`, when set, replaces
/// the base level.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    config: LoggingConfig,
    directives: Vec<String>,
    with_target: bool,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::from_config(&LoggingConfig::default())
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            config: config.clone(),
            directives: Vec::new(),
            with_target: true,
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Adds a filter directive such as `relay_framework=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEventConfig) -> Self {
        self.config.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.config.thread_ids = enabled;
        self
    }

    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.config.file_location = enabled;
        self
    }

    /// Logs to `path`, rotated per `rotation`, keeping at most `max_files`.
    pub fn file(
        mut self,
        path: impl Into<PathBuf>,
        rotation: LogRotation,
        max_files: u32,
    ) -> Self {
        self.config.output = LogOutput::File;
        self.config.file_path = Some(path.into());
        self.config.rotation = rotation;
        self.config.max_files = max_files;
        self
    }

    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber, failing if one is already installed.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let (writer, file_unavailable) = self.writer();
        let result = tracing_subscriber::registry()
            .with(self.layer(writer))
            .with(self.filter())
            .try_init();
        if file_unavailable {
            warn!("File output unavailable, logging to stdout");
        }
        result
    }

    fn filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.level.as_str()));

        let configured = self
            .config
            .filters
            .iter()
            .map(|(module, level)| format!("{module}={level}"));
        for directive in configured.chain(self.directives.iter().cloned()) {
            match directive.parse() {
                Ok(parsed) => filter = filter.add_directive(parsed),
                Err(error) => eprintln!("Ignoring invalid log directive '{directive}': {error}"),
            }
        }
        filter
    }

    /// Returns the writer and whether a requested file could not be opened.
    fn writer(&self) -> (BoxMakeWriter, bool) {
        match (self.config.output, &self.config.file_path) {
            (LogOutput::Stderr, _) => (BoxMakeWriter::new(std::io::stderr), false),
            (LogOutput::Stdout, _) => (BoxMakeWriter::new(std::io::stdout), false),
            (LogOutput::File, path) => match path.as_deref().and_then(|p| self.appender(p)) {
                Some(appender) => (BoxMakeWriter::new(appender), false),
                None => (BoxMakeWriter::new(std::io::stdout), true),
            },
        }
    }

    fn appender(&self, path: &Path) -> Option<RollingFileAppender> {
        let rotation = match self.config.rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        };
        let prefix = path.file_name().unwrap_or_else(|| OsStr::new("relay.log"));

        RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(prefix.to_string_lossy())
            .max_log_files(self.config.max_files.max(1) as usize)
            .build(path.parent().unwrap_or_else(|| Path::new(".")))
            .map_err(|error| eprintln!("Failed to open log file {}: {error}", path.display()))
            .ok()
    }

    fn layer(&self, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = fmt_span(&self.config.span_events);
        let target = self.with_target;
        let threads = self.config.thread_ids;
        let location = self.config.file_location;

        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(spans)
            .with_target(target)
            .with_thread_ids(threads)
            .with_file(location)
            .with_line_number(location);

        match self.config.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn fmt_span(events: &SpanEventConfig) -> FmtSpan {
    [
        (events.new, FmtSpan::NEW),
        (events.enter, FmtSpan::ENTER),
        (events.exit, FmtSpan::EXIT),
        (events.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(enabled, _)| *enabled)
    .fold(FmtSpan::NONE, |spans, (_, span)| spans | span)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_builder_keeps_configured_filters() {
        let config = LoggingConfig {
            level: LogLevel::Warn,
            filters: BTreeMap::from([("relay_processor".to_string(), LogLevel::Debug)]),
            file_location: true,
            ..Default::default()
        };
        let builder = LoggingBuilder::from_config(&config).directive("relay_framework=trace");

        assert_eq!(builder.config.level, LogLevel::Warn);
        assert!(builder.config.file_location);
        assert_eq!(builder.config.max_files, 5);
        assert_eq!(builder.directives, vec!["relay_framework=trace".to_string()]);
    }

    #[test]
    fn test_span_events_combine() {
        let lifecycle = fmt_span(&SpanEventConfig {
            new: true,
            close: true,
            ..Default::default()
        });
        assert_eq!(lifecycle, FmtSpan::NEW | FmtSpan::CLOSE);
        assert_eq!(fmt_span(&SpanEventConfig::default()), FmtSpan::NONE);
    }

    #[test]
    fn test_missing_file_path_falls_back_to_stdout() {
        let builder = LoggingBuilder::new().output(LogOutput::File);
        let (_, file_unavailable) = builder.writer();
        assert!(file_unavailable);
    }
}
