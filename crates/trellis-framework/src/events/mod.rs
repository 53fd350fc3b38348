//! Typed hooks over a distributed transport.
//!
//! See [`EventBus`] for the delivery guarantees of each operation.

mod bus;

use std::fmt;

use serde::Serialize;

pub use bus::{EventBus, Unsubscribe};

use crate::error::HookDeliveryError;

/// Process-local identifier of one event bus subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of [`EventBus::emit_local`].
#[derive(Debug, Clone, Default)]
pub struct LocalEmitReport {
    /// Listeners that were invoked.
    pub invoked: usize,
    /// One entry per listener that failed or panicked.
    pub failures: Vec<HookDeliveryError>,
}

impl LocalEmitReport {
    /// Returns `true` if every invoked listener succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
