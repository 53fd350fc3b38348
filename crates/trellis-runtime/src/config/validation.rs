//! Configuration validation utilities.
//!
//! Unknown log levels never reach this point: [`LogLevel`](super::LogLevel)
//! rejects them while the configuration is extracted.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{EventsConfig, LogOutput, LoggingConfig, PluginsConfig, TrellisConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TrellisConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_plugins_config(&config.plugins)?;
    validate_events_config(&config.events)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }

    for module in logging.filters.keys() {
        if module.trim().is_empty() || module.contains(['=', ',', ' ']) {
            return Err(ConfigError::validation(format!(
                "Invalid logging filter target: {module:?}"
            )));
        }
    }

    Ok(())
}

fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    if plugins.init_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "plugins.init_timeout_ms must be greater than 0",
        ));
    }

    if plugins.ready_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "plugins.ready_timeout_ms must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for id in &plugins.disabled {
        if id.trim().is_empty() {
            return Err(ConfigError::validation(
                "plugins.disabled cannot contain an empty plugin id",
            ));
        }
        if !seen.insert(id) {
            return Err(ConfigError::validation(format!(
                "Plugin {id} is listed twice in plugins.disabled"
            )));
        }
    }

    Ok(())
}

fn validate_events_config(events: &EventsConfig) -> ConfigResult<()> {
    if events.retention_limit == 0 {
        return Err(ConfigError::validation(
            "events.retention_limit must be greater than 0",
        ));
    }

    if let Some(instance) = &events.instance_id
        && instance.trim().is_empty()
    {
        return Err(ConfigError::validation(
            "events.instance_id cannot be blank",
        ));
    }

    Ok(())
}
