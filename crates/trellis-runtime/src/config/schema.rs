//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_framework::ManagerConfig;
use trellis_transport::DEFAULT_RETENTION_LIMIT;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrellisConfig {
    /// Logging setup for the host process.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Plugin collection and boot settings.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Event bus settings.
    #[serde(default)]
    pub events: EventsConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log severity accepted in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
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

/// Line format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events produce log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
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
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `trellis_framework = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in each record.
    #[serde(default)]
    pub file_location: bool,
}

// =============================================================================
// Plugins
// =============================================================================

/// Plugin boot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Upper bound for each plugin's `init` callback, in milliseconds.
    #[serde(default = "default_callback_timeout_ms")]
    pub init_timeout_ms: u64,

    /// Upper bound for each plugin's `after_plugins_ready` callback, in milliseconds.
    #[serde(default = "default_callback_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Plugin ids skipped during collection.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: default_callback_timeout_ms(),
            ready_timeout_ms: default_callback_timeout_ms(),
            disabled: Vec::new(),
        }
    }
}

impl PluginsConfig {
    /// Converts to the plugin manager's settings.
    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            init_timeout: Duration::from_millis(self.init_timeout_ms),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            disabled: self.disabled.clone(),
        }
    }
}

fn default_callback_timeout_ms() -> u64 {
    30_000
}

// =============================================================================
// Events
// =============================================================================

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Payloads a work-queue hook keeps while no consumer is attached.
    #[serde(default = "default_retention_limit")]
    pub retention_limit: usize,

    /// Name of this host on the shared transport; defaults to the process id.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            retention_limit: default_retention_limit(),
            instance_id: None,
        }
    }
}

impl EventsConfig {
    /// The configured instance id, or `pid-<process id>`.
    pub fn instance_name(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| format!("pid-{}", std::process::id()))
    }
}

fn default_retention_limit() -> usize {
    DEFAULT_RETENTION_LIMIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugins_config_converts_to_manager_config() {
        let plugins = PluginsConfig {
            init_timeout_ms: 250,
            ready_timeout_ms: 1_500,
            disabled: vec!["search".into()],
        };
        let manager = plugins.to_manager_config();
        assert_eq!(manager.init_timeout, Duration::from_millis(250));
        assert_eq!(manager.ready_timeout, Duration::from_millis(1_500));
        assert_eq!(manager.disabled, ["search"]);
    }

    #[test]
    fn test_instance_name_prefers_configured_id() {
        let mut events = EventsConfig::default();
        assert!(events.instance_name().starts_with("pid-"));
        events.instance_id = Some("worker-2".into());
        assert_eq!(events.instance_name(), "worker-2");
    }

    #[test]
    fn test_log_level_parses_lowercase() {
        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(level.to_tracing_level(), tracing::Level::WARN);
        assert!(serde_json::from_str::<LogLevel>("\"loud\"").is_err());
    }
}
