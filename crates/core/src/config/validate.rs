use super::{types::Config, ConfigError};
use crate::classify::RuleSet;

/// Validate configuration
/// Currently validates:
/// - at least one data dir, all absolute
/// - threshold is a fraction in [0, 1]
/// - batch size, confirm attempts and scan concurrency are positive
/// - endpoint is http(s)
/// - every rule compiles
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.data_dirs.is_empty() {
        return Err(ConfigError::ValidationError(
            "data_dirs must list at least one directory".to_string(),
        ));
    }
    if let Some(dir) = config.data_dirs.iter().find(|d| !d.is_absolute()) {
        return Err(ConfigError::ValidationError(format!(
            "data_dirs entry is not absolute: {}",
            dir.display()
        )));
    }

    if !(0.0..=1.0).contains(&config.fail_past_threshold) {
        return Err(ConfigError::ValidationError(format!(
            "fail_past_threshold must be between 0 and 1, got {}",
            config.fail_past_threshold
        )));
    }

    if config.rtorrent.batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "rtorrent.batch_size cannot be 0".to_string(),
        ));
    }
    if !(config.rtorrent.url.starts_with("http://") || config.rtorrent.url.starts_with("https://"))
    {
        return Err(ConfigError::ValidationError(format!(
            "rtorrent.url must be an http(s) URL, got {:?}",
            config.rtorrent.url
        )));
    }

    if config.erase.confirm_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "erase.confirm_attempts cannot be 0".to_string(),
        ));
    }
    if config.scan.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "scan.concurrency cannot be 0".to_string(),
        ));
    }

    RuleSet::compile(&config.rules).map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    Ok(())
}
