//! # Trellis Transport
//!
//! Transport implementations for the Trellis event bus.
//!
//! Only the in-memory fabric lives here.  It is a complete stand-in for a
//! real broker: one [`MemoryFabric`] plays the broker, and every simulated
//! host instance opens its own [`MemoryTransport`] connection to it.
//!
//! ```rust
//! use trellis_transport::MemoryFabric;
//!
//! let fabric = MemoryFabric::with_retention_limit(64);
//! let instance_a = fabric.connection("a");
//! let instance_b = fabric.connection("b");
//! # let _ = (instance_a, instance_b);
//! ```

pub mod memory;

pub use memory::{DEFAULT_RETENTION_LIMIT, MemoryFabric, MemoryTransport};
