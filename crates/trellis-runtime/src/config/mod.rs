//! Configuration for a Trellis host.
//!
//! Settings are layered with figment (defaults, files, `TRELLIS_*`
//! environment variables, programmatic overrides) and checked by
//! [`validate_config`] before the runtime uses them.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    EventsConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, PluginsConfig, SpanEventConfig,
    TrellisConfig,
};
pub use validation::validate_config;
