//! # Trellis
//!
//! A plugin runtime with dependency-ordered boot and a typed event bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   collect   ┌───────────────┐  tiers   ┌─────────────────────┐
//! │  PluginSource    │────────────▶│ PluginManager │─────────▶│ init (per tier)     │
//! │ (static / #[plugin])           │  (registry)   │          │ after_plugins_ready │
//! └──────────────────┘             └───────────────┘          └─────────────────────┘
//!                                          │ core.events
//!                                          ▼
//!                                   ┌─────────────┐  broadcast / work-queue  ┌───────────┐
//!                                   │  EventBus   │─────────────────────────▶│ Transport │
//!                                   └─────────────┘                          └───────────┘
//! ```
//!
//! - **Core**: tokens (`ServiceRef`, `ExtensionPoint`, `Hook`) and the `Transport` contract
//! - **Transport**: the in-memory fabric standing in for a message broker
//! - **Framework**: plugin registration, ordering, two-phase boot, event bus
//! - **Runtime**: configuration, logging, signal handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! #[plugin("catalog")]
//! fn catalog(env: &mut RegistrationEnv) {
//!     env.register_service(CATALOG_DB, Arc::new(SqlCatalog::default()));
//! }
//!
//! #[tokio::main]
//! async fn main() -> ExitCode {
//!     let boot = async {
//!         let mut runtime = TrellisRuntime::builder().build().await?;
//!         runtime.boot(&LinkedPluginSource, &NoopMigrator).await?;
//!         runtime.run().await
//!     };
//!     boot.await.map_or_else(|e| e.exit_code(), |()| ExitCode::SUCCESS)
//! }
//! ```
//!
//! `#[plugin]` expands to paths under `trellis_framework`, so crates using it
//! also depend on `trellis-framework` directly.
//!
//! ## Features
//!
//! - `macros` *(default)*: the `#[plugin]` attribute
//! - `toml-config` *(default)* / `yaml-config`: configuration file formats
//! - `json-log`: JSON log lines

pub use trellis_core as core;
pub use trellis_framework as framework;
pub use trellis_runtime as runtime;
pub use trellis_transport as transport;

#[cfg(feature = "macros")]
pub use trellis_macros::plugin;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use trellis_runtime::{RuntimeError, TrellisRuntime};

    // Tokens and delivery
    pub use trellis_core::{
        BoxError, DeliveryMode, ExtensionPoint, Extensions, Hook, ServiceRef, SubscribeOptions,
    };

    // Plugin authoring
    pub use trellis_framework::{
        Deps, EVENTS, EventBus, InitDescriptor, LinkedPluginSource, NoopMigrator, Permission,
        PermissionAction, PluginDescriptor, RegistrationEnv, StaticPluginSource,
    };

    #[cfg(feature = "macros")]
    pub use trellis_macros::plugin;

    pub use std::process::ExitCode;
    pub use std::sync::Arc;
}
