//! # Trellis Runtime
//!
//! The host side of Trellis:
//!
//! - [`config`]: layered configuration (`trellis.toml`, `TRELLIS_*` variables)
//! - [`logging`]: tracing subscriber setup driven by that configuration
//! - [`TrellisRuntime`]: connects the event bus, boots the plugins of a
//!   [`PluginSource`](trellis_framework::PluginSource), waits for a shutdown
//!   signal and tears the bus down
//!
//! ```rust,ignore
//! use std::process::ExitCode;
//! use trellis_framework::{LinkedPluginSource, NoopMigrator};
//! use trellis_runtime::TrellisRuntime;
//!
//! #[tokio::main]
//! async fn main() -> ExitCode {
//!     let result = async {
//!         let mut runtime = TrellisRuntime::builder().build().await?;
//!         runtime.boot(&LinkedPluginSource, &NoopMigrator).await?;
//!         runtime.run().await
//!     };
//!     match result.await {
//!         Ok(()) => ExitCode::SUCCESS,
//!         Err(err) => err.exit_code(),
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, TrellisConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, TrellisRuntime};

pub use tracing;

/// Logging macros for plugin code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
