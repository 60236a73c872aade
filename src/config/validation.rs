use crate::config::types::{ApiConfig, Config, HarvestConfig, OutputConfig, PacingConfig};
use crate::{ConfigError, ConfigResult};
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_harvest_config(&config.harvest)?;
    validate_api_config(&config.api)?;
    validate_pacing_config(&config.pacing)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates harvest run configuration
fn validate_harvest_config(config: &HarvestConfig) -> ConfigResult<()> {
    if config.max_execution_minutes == 0 {
        return Err(ConfigError::Validation(
            "max_execution_minutes must be >= 1".to_string(),
        ));
    }

    if config.max_units == Some(0) {
        return Err(ConfigError::Validation(
            "max_units must be >= 1 when set".to_string(),
        ));
    }

    if config.categories.is_empty() {
        return Err(ConfigError::Validation(
            "categories cannot be empty".to_string(),
        ));
    }

    let unique: HashSet<_> = config.categories.iter().collect();
    if unique.len() != config.categories.len() {
        return Err(ConfigError::Validation(
            "categories cannot contain duplicates".to_string(),
        ));
    }

    Ok(())
}

/// Validates remote API configuration
fn validate_api_config(config: &ApiConfig) -> ConfigResult<()> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    Url::parse(&config.referer)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid referer: {}", e)))?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates pacing and retry configuration
fn validate_pacing_config(config: &PacingConfig) -> ConfigResult<()> {
    if config.min_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.min_delay_ms, config.max_delay_ms
        )));
    }

    let delay_range = config.min_delay_ms..=config.max_delay_ms;
    if !delay_range.contains(&config.initial_delay_ms) {
        return Err(ConfigError::Validation(format!(
            "initial_delay_ms must lie within [{}, {}], got {}",
            config.min_delay_ms, config.max_delay_ms, config.initial_delay_ms
        )));
    }

    if config.growth_factor < 1.0 {
        return Err(ConfigError::Validation(format!(
            "growth_factor must be >= 1.0, got {}",
            config.growth_factor
        )));
    }

    if config.decay_factor <= 0.0 || config.decay_factor > 1.0 {
        return Err(ConfigError::Validation(format!(
            "decay_factor must be in (0.0, 1.0], got {}",
            config.decay_factor
        )));
    }

    if !(0.0..1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "jitter must be in [0.0, 1.0), got {}",
            config.jitter
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.backoff_schedule_ms.is_empty() {
        return Err(ConfigError::Validation(
            "backoff_schedule_ms cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> ConfigResult<()> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.export_dir.is_empty() {
        return Err(ConfigError::Validation(
            "export_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}
