//! Unified error types for the Trellis core.
//!
//! Boot-level errors (cycles, init failures) live in `trellis-framework`; this
//! module only covers the registry and the transport contract.

use thiserror::Error;

/// Boxed error returned by plugin-supplied callbacks and listeners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Service Errors
// =============================================================================

/// Errors raised by the [`ServiceRegistry`](crate::ServiceRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// No implementation has been registered for the id.
    #[error("service '{id}' not found")]
    NotFound {
        /// The requested service id.
        id: String,
    },

    /// An implementation for the id was already registered.
    #[error("service '{id}' is already registered")]
    Duplicate {
        /// The duplicated service id.
        id: String,
    },

    /// The stored implementation has a different type than the reference asks for.
    #[error("service '{id}' is not of type '{expected}'")]
    TypeMismatch {
        /// The service id.
        id: String,
        /// Type name carried by the requesting reference.
        expected: &'static str,
    },
}

impl ServiceError {
    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a duplicate-registration error.
    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::Duplicate { id: id.into() }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection has not been opened yet.
    #[error("transport '{transport}' is not connected")]
    NotConnected {
        /// Name of the transport.
        transport: String,
    },

    /// The connection was closed.
    #[error("transport '{transport}' is closed")]
    Closed {
        /// Name of the transport.
        transport: String,
    },

    /// Opening the connection failed.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// Reason for failure.
        reason: String,
    },

    /// The fabric refused or failed to accept a payload.
    #[error("failed to publish to '{topic}': {reason}")]
    PublishFailed {
        /// Topic the payload was addressed to.
        topic: String,
        /// Reason for failure.
        reason: String,
    },

    /// Registering a subscription failed.
    #[error("failed to subscribe to '{topic}': {reason}")]
    SubscribeFailed {
        /// Topic of the subscription.
        topic: String,
        /// Reason for failure.
        reason: String,
    },
}

impl TransportError {
    /// Creates a publish failure.
    pub fn publish_failed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Creates a subscribe failure.
    pub fn subscribe_failed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for registry operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
