use std::path::Path;

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// Load and merge configuration.
///
/// 1. Starts from [`Config::default()`].
/// 2. Merges `config_dir/config.toml` if it exists.
/// 3. Merges `explicit` on top; this file must exist.
/// 4. Validates the result.
///
/// # Errors
///
/// Returns [`ConfigError`] on I/O failure, parse failure, a missing
/// explicit file, or the first validation failure.
pub fn load_config(config_dir: &Path, explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    let global_path = config_dir.join("config.toml");
    if global_path.is_file() {
        let content = std::fs::read_to_string(&global_path)?;
        config = merge_configs(&config, &content)?;
        tracing::debug!(path = %global_path.display(), "loaded global config");
    }

    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        config = merge_configs(&config, &content)?;
        tracing::debug!(path = %path.display(), "loaded config file");
    }

    validate(&config).map_err(first_error)?;
    Ok(config)
}

/// Parse a TOML string directly into a validated [`Config`].
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config =
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&config).map_err(first_error)?;
    Ok(config)
}

fn first_error(errors: Vec<ConfigError>) -> ConfigError {
    errors
        .into_iter()
        .next()
        .unwrap_or_else(|| ConfigError::Validation {
            field: "unknown".to_string(),
            message: "validation failed".to_string(),
        })
}
