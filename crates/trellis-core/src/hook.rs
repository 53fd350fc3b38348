//! Hook tokens and subscription options for the event bus.
//!
//! Hook ids are namespaced `<owner>.<area>.<event>` by convention:
//!
//! ```rust,ignore
//! #[derive(Clone, Serialize, Deserialize)]
//! pub struct EntityChanged { pub entity: String }
//!
//! pub const ENTITY_CHANGED: Hook<EntityChanged> = Hook::new("catalog.entity.changed");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Typed token identifying one event and its payload shape.
pub struct Hook<T> {
    id: &'static str,
    _marker: PhantomData<fn(T)>,
}

impl<T> Hook<T> {
    /// Creates a new hook token.
    pub const fn new(id: &'static str) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Returns the hook id.
    pub const fn id(&self) -> &'static str {
        self.id
    }
}

impl<T> Clone for Hook<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Hook<T> {}

impl<T> PartialEq for Hook<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Hook<T> {}

impl<T> Hash for Hook<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("id", &self.id).finish()
    }
}

impl<T> fmt::Display for Hook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id)
    }
}

// =============================================================================
// Delivery modes
// =============================================================================

/// How payloads emitted on a hook reach a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Every subscribed instance receives its own copy.
    #[default]
    Broadcast,
    /// Subscribers compete; each payload reaches exactly one of them.
    WorkQueue,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => write!(f, "broadcast"),
            Self::WorkQueue => write!(f, "work-queue"),
        }
    }
}

/// Options passed to `EventBus::subscribe`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Delivery mode of the subscription.
    pub mode: DeliveryMode,
}

impl SubscribeOptions {
    /// Fleet-wide fan-out (the default).
    pub const fn broadcast() -> Self {
        Self {
            mode: DeliveryMode::Broadcast,
        }
    }

    /// Competing-consumer delivery.
    pub const fn work_queue() -> Self {
        Self {
            mode: DeliveryMode::WorkQueue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_broadcast() {
        assert_eq!(SubscribeOptions::default().mode, DeliveryMode::Broadcast);
        assert_eq!(SubscribeOptions::work_queue().mode, DeliveryMode::WorkQueue);
    }

    #[test]
    fn test_hook_identity() {
        const A: Hook<u32> = Hook::new("core.test.ping");
        const B: Hook<u32> = Hook::new("core.test.ping");
        assert_eq!(A, B);
        assert_eq!(A.to_string(), "core.test.ping");
    }
}
