//! Runtime error types.

use std::process::ExitCode;

use thiserror::Error;
use trellis_framework::{BootError, EventBusError};

use crate::config::ConfigError;

/// Errors that can stop a Trellis host.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("boot failed: {0}")]
    Boot(#[from] BootError),

    #[error("event bus error: {0}")]
    EventBus(#[from] EventBusError),

    /// `boot` was called on a runtime that already booted.
    #[error("runtime already booted")]
    AlreadyBooted,

    /// `run` was called before a successful `boot`.
    #[error("runtime has not been booted")]
    NotBooted,
}

impl RuntimeError {
    /// Numeric exit status: 78 (`EX_CONFIG`) for configuration problems,
    /// 70 (`EX_SOFTWARE`) for boot failures, 69 (`EX_UNAVAILABLE`) for the bus.
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Config(_) => 78,
            Self::Boot(_) | Self::AlreadyBooted | Self::NotBooted => 70,
            Self::EventBus(_) => 69,
        }
    }

    /// Process exit code for a host that stops with this error.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    /// The plugin a boot failure is attributed to, if any.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Boot(err) => err.plugin_id(),
            _ => None,
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
