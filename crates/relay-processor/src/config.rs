//! Tracking processor settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessorError, ProcessorResult};
use crate::error_handler::ErrorMode;

/// Where a processor without stored tokens starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialPosition {
    /// From the first event in the log.
    #[default]
    Tail,
    /// From the next event to be published.
    Head,
}

/// Settings of one [`TrackingEventProcessor`](crate::TrackingEventProcessor).
#[derive(Debug, Clone)]
pub struct TrackingProcessorConfig {
    /// Number of segments created on first start. Must be a power of two.
    pub initial_segment_count: u32,
    /// Maximum number of segments this instance processes at once.
    pub max_workers: usize,
    /// Maximum number of events handled between two safe points.
    pub batch_size: usize,
    /// How often unclaimed segments are looked for.
    pub claim_interval: Duration,
    /// How long a worker waits for new events before checking in.
    pub idle_poll: Duration,
    /// How long a released or failed segment is left alone before it may be
    /// claimed again by this instance.
    pub retry_backoff: Duration,
    pub initial_position: InitialPosition,
    /// Whether event types without a handler are suppressed on the stream.
    pub blacklisting: bool,
    pub error_mode: ErrorMode,
}

impl Default for TrackingProcessorConfig {
    fn default() -> Self {
        Self {
            initial_segment_count: 1,
            max_workers: 4,
            batch_size: 32,
            claim_interval: Duration::from_millis(500),
            idle_poll: Duration::from_millis(250),
            retry_backoff: Duration::from_secs(1),
            initial_position: InitialPosition::Tail,
            blacklisting: true,
            error_mode: ErrorMode::Log,
        }
    }
}

impl TrackingProcessorConfig {
    /// Checks the settings for values the processor cannot work with.
    pub fn validate(&self) -> ProcessorResult<()> {
        if !self.initial_segment_count.is_power_of_two() {
            return Err(ProcessorError::InvalidConfig(format!(
                "initial_segment_count must be a power of two, got {}",
                self.initial_segment_count
            )));
        }
        if self.max_workers == 0 {
            return Err(ProcessorError::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ProcessorError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.claim_interval.is_zero() || self.idle_poll.is_zero() {
            return Err(ProcessorError::InvalidConfig(
                "claim_interval and idle_poll must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TrackingProcessorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_segment_count_must_be_power_of_two() {
        let config = TrackingProcessorConfig {
            initial_segment_count: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ProcessorError::InvalidConfig(_))));
    }
}
