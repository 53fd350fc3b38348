//! # Trellis Framework
//!
//! The two subsystems plugins interact with:
//!
//! - **Plugin runtime**: [`PluginManager`] collects each plugin's
//!   registrations from a [`PluginSource`], orders plugins by the services
//!   they depend on, applies schemas through a [`SchemaMigrator`], and runs
//!   the two-phase boot (`init`, then `after_plugins_ready`).
//! - **Event bus**: [`EventBus`] publishes typed [`Hook`](trellis_core::Hook)
//!   payloads over a [`Transport`](trellis_core::Transport) in broadcast or
//!   work-queue mode, and dispatches in-process with failure isolation.
//!
//! A plugin is a descriptor with a synchronous `register` function:
//!
//! ```rust,ignore
//! fn register(env: &mut RegistrationEnv) {
//!     env.register_service(CATALOG_DB, Arc::new(SqlCatalog::default()));
//!     env.register_init(
//!         InitDescriptor::new()
//!             .dep("events", EVENTS)
//!             .init(|deps| async move { /* ... */ Ok(()) }),
//!     );
//! }
//!
//! let source = StaticPluginSource::new([PluginDescriptor::new("catalog", register)]);
//! ```

pub mod error;
pub mod events;
pub mod manager;
pub mod migration;
pub mod plugin;

pub use error::{
    BootError, BootResult, EventBusError, EventBusResult, HookDeliveryError, InitFailure,
    InitPhase,
};
pub use events::{EventBus, LocalEmitReport, SubscriptionId, Unsubscribe};
pub use manager::{BootPhase, BootReport, DEFAULT_CALLBACK_TIMEOUT, ManagerConfig, PluginManager};
pub use migration::{NoopMigrator, SchemaMigrator};
pub use plugin::{
    Deps, InitDescriptor, InitFn, LinkedPluginSource, PLUGIN_REGISTRY, Permission,
    PermissionAction, PluginDescriptor, PluginRecord, PluginSource, RegisterFn, RegistrationEnv,
    StaticPluginSource,
};

// Used by `#[plugin]` expansions.
pub use linkme;

/// Service id under which the host exposes its [`EventBus`].
pub const EVENTS: trellis_core::ServiceRef<EventBus> = trellis_core::ServiceRef::new("core.events");
