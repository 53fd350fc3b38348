//! # Trellis Core
//!
//! Leaf building blocks shared by every layer of the Trellis plugin host:
//!
//! - **Service tokens**: [`ServiceRef<T>`] and the [`ServiceRegistry`] that
//!   maps each token id to exactly one implementation.
//! - **Extension points**: [`ExtensionPoint<T>`] tokens plus the default
//!   [`Extensions<T>`] collection.
//! - **Hooks**: [`Hook<T>`] tokens and [`DeliveryMode`] /
//!   [`SubscribeOptions`] for the event bus.
//! - **Transport contract**: the [`Transport`] trait any distributed fabric
//!   implements.
//!
//! All tokens are plain string ids paired with a Rust type parameter, so they
//! can be declared as `const` items:
//!
//! ```rust
//! use trellis_core::{Hook, ServiceRef};
//!
//! pub trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! pub const CLOCK: ServiceRef<dyn Clock> = ServiceRef::new("core.clock");
//! pub const TICK: Hook<u64> = Hook::new("core.clock.tick");
//! ```

pub mod error;
pub mod extension;
pub mod hook;
pub mod service;
pub mod transport;

pub use error::{BoxError, ServiceError, ServiceResult, TransportError, TransportResult};
pub use extension::{ExtensionPoint, Extensions};
pub use hook::{DeliveryMode, Hook, SubscribeOptions};
pub use service::{ServiceArc, ServiceRef, ServiceRegistry, downcast_service};
pub use transport::{
    BoxedTransport, DeliveryStream, Payload, Transport, TransportSubscription,
    TransportSubscriptionId,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        BoxError, DeliveryMode, ExtensionPoint, Extensions, Hook, ServiceRef, SubscribeOptions,
    };
}
