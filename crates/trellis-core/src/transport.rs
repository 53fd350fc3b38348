//! The contract a distributed transport must satisfy.
//!
//! The event bus never talks to a broker directly.  It relies on a
//! [`Transport`] connection that provides:
//!
//! - **fan-out** delivery: every [`DeliveryMode::Broadcast`] subscription on a
//!   topic receives its own copy of each payload, across all host instances;
//! - **competing-consumer** delivery: all [`DeliveryMode::WorkQueue`]
//!   subscriptions on a topic form one group, and each payload is handed to
//!   exactly one member of it.  Payloads published while the group is empty
//!   are retained until a member enrolls or a retention limit is hit;
//! - an open/close connection lifecycle.
//!
//! Exclusivity of work-queue delivery is the transport's responsibility; the
//! bus does not lock anything locally to enforce it.
//!
//! Payloads are opaque bytes.  `trellis-transport` ships an in-memory fabric
//! that implements both modes for single-process and test use.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportResult;
use crate::hook::DeliveryMode;

/// Encoded hook payload as carried by a transport.
pub type Payload = Vec<u8>;

/// Stream of payloads delivered to one subscription.
///
/// The stream ends when the subscription is removed or the connection closes.
pub type DeliveryStream = BoxStream<'static, Payload>;

/// Identifier of a subscription within one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportSubscriptionId(pub u64);

impl fmt::Display for TransportSubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription returned by [`Transport::subscribe`].
pub struct TransportSubscription {
    /// Handle used to remove the subscription again.
    pub id: TransportSubscriptionId,
    /// Payloads routed to this subscription.
    pub deliveries: DeliveryStream,
}

impl fmt::Debug for TransportSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// One connection to the distributed fabric, owned by one host instance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name used in logs and errors.
    fn name(&self) -> &str;

    /// Opens the connection.  Calling it on an open connection is a no-op.
    async fn connect(&self) -> TransportResult<()>;

    /// Publishes `payload` on `topic`.
    ///
    /// Resolves once the fabric has accepted the payload, not once any
    /// subscriber has processed it.
    async fn publish(&self, topic: &str, payload: Payload) -> TransportResult<()>;

    /// Registers a subscription on `topic` in the given mode.
    async fn subscribe(
        &self,
        topic: &str,
        mode: DeliveryMode,
    ) -> TransportResult<TransportSubscription>;

    /// Removes a subscription created through this connection.
    ///
    /// Unknown ids are ignored.
    async fn unsubscribe(&self, id: TransportSubscriptionId) -> TransportResult<()>;

    /// Closes the connection and ends every subscription made through it.
    ///
    /// Closing twice is a no-op.
    async fn close(&self) -> TransportResult<()>;
}

/// Shared transport handle.
pub type BoxedTransport = Arc<dyn Transport>;
