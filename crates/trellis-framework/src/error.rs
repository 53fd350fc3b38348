//! Error types for the Trellis framework.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use trellis_core::{BoxError, ServiceError, TransportError};

use crate::events::SubscriptionId;
use crate::manager::BootPhase;

// =============================================================================
// Boot errors
// =============================================================================

/// Which callback of a plugin was running when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    /// Phase 1: `init`.
    Init,
    /// Phase 2: `after_plugins_ready`.
    Ready,
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Ready => write!(f, "after_plugins_ready"),
        }
    }
}

/// The reason a plugin callback did not complete.
#[derive(Debug, Error)]
pub enum InitFailure {
    /// A declared dependency could not be resolved.
    #[error(transparent)]
    MissingService(#[from] ServiceError),

    /// The callback returned an error.
    #[error("{0}")]
    Failed(#[source] BoxError),

    /// The callback did not finish within the configured timeout.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The callback panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Fatal errors raised while collecting or booting plugins.
#[derive(Debug, Error)]
pub enum BootError {
    /// Two descriptors share one plugin id.
    #[error("plugin '{plugin_id}' was provided more than once")]
    DuplicatePlugin {
        /// The repeated id.
        plugin_id: String,
    },

    /// A plugin called `register_init` more than once.
    #[error("plugin '{plugin_id}' registered more than one init descriptor")]
    DuplicateInit {
        /// The offending plugin.
        plugin_id: String,
    },

    /// Service registration failed (duplicate id).
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The dependency graph contains a cycle.  The first id is repeated at
    /// the end of `cycle`.
    #[error("cyclic plugin dependency: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Plugin ids along the cycle, in "depends on" direction.
        cycle: Vec<String>,
    },

    /// The schema migrator rejected a plugin's schema.
    #[error("schema migration for plugin '{plugin_id}' failed: {cause}")]
    Migration {
        /// The plugin whose schema was being applied.
        plugin_id: String,
        /// Migrator error.
        #[source]
        cause: BoxError,
    },

    /// A plugin's `init` or `after_plugins_ready` failed.
    #[error("plugin '{plugin_id}' failed during {phase}: {cause}")]
    PluginInit {
        /// The failing plugin.
        plugin_id: String,
        /// Which callback failed.
        phase: InitPhase,
        /// Why it failed.
        #[source]
        cause: InitFailure,
    },

    /// The manager was used out of order.
    #[error("manager is in phase {actual}, expected {expected}")]
    InvalidPhase {
        /// Phase the operation requires.
        expected: BootPhase,
        /// Phase the manager is in.
        actual: BootPhase,
    },
}

impl BootError {
    pub(crate) fn plugin_init(
        plugin_id: impl Into<String>,
        phase: InitPhase,
        cause: InitFailure,
    ) -> Self {
        Self::PluginInit {
            plugin_id: plugin_id.into(),
            phase,
            cause,
        }
    }

    /// The plugin this error is attributed to, if any.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::DuplicatePlugin { plugin_id }
            | Self::DuplicateInit { plugin_id }
            | Self::Migration { plugin_id, .. }
            | Self::PluginInit { plugin_id, .. } => Some(plugin_id),
            _ => None,
        }
    }
}

/// Result type for collection and boot.
pub type BootResult<T> = Result<T, BootError>;

// =============================================================================
// Event bus errors
// =============================================================================

/// Errors returned by [`EventBus`](crate::EventBus) operations.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The payload could not be serialized.
    #[error("failed to encode payload for hook '{hook_id}': {source}")]
    Encode {
        /// Hook the payload was emitted on.
        hook_id: String,
        /// Serializer error.
        source: serde_json::Error,
    },

    /// The bus has been shut down.
    #[error("event bus has been shut down")]
    Closed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// A listener failure isolated by `emit_local`.
#[derive(Debug, Clone, Error)]
#[error("listener {subscription} of plugin '{plugin_id}' failed on hook '{hook_id}': {cause}")]
pub struct HookDeliveryError {
    /// Hook being delivered.
    pub hook_id: String,
    /// Plugin that owns the listener.
    pub plugin_id: String,
    /// The failing subscription.
    pub subscription: SubscriptionId,
    /// Rendered listener error or panic message.
    pub cause: String,
}
