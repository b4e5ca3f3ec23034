use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Concurrency cap is at least 1
/// - Extractor binary path is non-empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.orchestrator.max_downloads == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_downloads must be at least 1".to_string(),
        ));
    }

    if config.extractor.binary.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "extractor.binary cannot be empty".to_string(),
        ));
    }

    Ok(())
}
