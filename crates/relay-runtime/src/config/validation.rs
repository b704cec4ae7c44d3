//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, ProcessorConfig, RelayConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &RelayConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;

    if config.query_bus.handler_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Query handler timeout must be greater than 0",
        ));
    }
    if config.event_store.suppression_refresh_ms == 0 {
        return Err(ConfigError::validation(
            "Suppression refresh interval must be greater than 0",
        ));
    }
    if config.token_store.claim_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Claim timeout must be greater than 0",
        ));
    }

    for (name, processor) in &config.processors {
        validate_processor_config(name, processor, config.token_store.claim_timeout_ms)?;
    }

    Ok(())
}

/// Validates logging configuration.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    if logging.max_files == 0 {
        return Err(ConfigError::validation("logging.max_files must be at least 1"));
    }
    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation("Log filter module names cannot be empty"));
    }
    Ok(())
}

/// Validates a single processor configuration.
fn validate_processor_config(
    name: &str,
    processor: &ProcessorConfig,
    claim_timeout_ms: u64,
) -> ConfigResult<()> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(ConfigError::invalid_processor(
            name,
            "name cannot be empty or contain whitespace",
        ));
    }

    if !processor.initial_segment_count.is_power_of_two() {
        return Err(ConfigError::invalid_processor(
            name,
            format!(
                "initial_segment_count must be a power of two, got {}",
                processor.initial_segment_count
            ),
        ));
    }

    if processor.max_workers == 0 {
        return Err(ConfigError::invalid_processor(name, "max_workers must be at least 1"));
    }

    if processor.batch_size == 0 {
        return Err(ConfigError::invalid_processor(name, "batch_size must be at least 1"));
    }

    if processor.claim_interval_ms == 0 || processor.idle_poll_ms == 0 {
        return Err(ConfigError::invalid_processor(
            name,
            "claim_interval_ms and idle_poll_ms must be greater than 0",
        ));
    }

    // Workers refresh their claim at least once per idle poll.
    if processor.idle_poll_ms >= claim_timeout_ms {
        return Err(ConfigError::invalid_processor(
            name,
            format!("idle_poll_ms must be shorter than the claim timeout ({claim_timeout_ms} ms)"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_segment_count() {
        let mut config = RelayConfig::default();
        config.processors.insert(
            "gift-cards".into(),
            ProcessorConfig {
                initial_segment_count: 6,
                ..Default::default()
            },
        );
        let result = validate_config(&config);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidProcessor { name, .. }) if name == "gift-cards"
        ));
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = RelayConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(validate_config(&config), Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = RelayConfig::default();
        config.query_bus.handler_timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_idle_poll_against_claim_timeout() {
        let mut config = RelayConfig::default();
        config.token_store.claim_timeout_ms = 100;
        config.processors.insert(
            "gift-cards".into(),
            ProcessorConfig {
                idle_poll_ms: 100,
                ..Default::default()
            },
        );
        assert!(validate_config(&config).is_err());
    }
}
