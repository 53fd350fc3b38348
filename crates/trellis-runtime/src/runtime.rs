//! Host orchestration: configuration, event bus, plugin boot and shutdown.
//!
//! ```rust,ignore
//! use trellis_runtime::TrellisRuntime;
//! use trellis_framework::{LinkedPluginSource, NoopMigrator};
//!
//! let mut runtime = TrellisRuntime::builder().profile("production").build().await?;
//! runtime.boot(&LinkedPluginSource, &NoopMigrator).await?;
//! runtime.run().await?;
//! ```

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use trellis_core::BoxedTransport;
use trellis_framework::{
    BootReport, EVENTS, EventBus, PluginManager, PluginSource, SchemaMigrator,
};
use trellis_transport::MemoryFabric;

use crate::config::{ConfigLoader, TrellisConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// A Trellis host process.
///
/// Owns the configuration, the [`EventBus`] (exposed to plugins as the core
/// service [`EVENTS`]) and the [`PluginManager`].
pub struct TrellisRuntime {
    config: TrellisConfig,
    bus: Arc<EventBus>,
    manager: PluginManager,
    report: Option<BootReport>,
}

impl TrellisRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    pub async fn from_config(
        config: TrellisConfig,
        transport: BoxedTransport,
    ) -> RuntimeResult<Self> {
        let bus = Arc::new(EventBus::connect(transport).await?);
        let manager = PluginManager::new(config.plugins.to_manager_config());

        info!(
            transport = %bus.transport_name(),
            disabled = config.plugins.disabled.len(),
            "Runtime initialized"
        );

        Ok(Self {
            config,
            bus,
            manager,
            report: None,
        })
    }

    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    /// The bus plugins receive as [`EVENTS`].
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    /// The executed boot order, once [`boot`](Self::boot) succeeded.
    pub fn report(&self) -> Option<&BootReport> {
        self.report.as_ref()
    }

    /// Collects the plugins of `source` and boots them.
    ///
    /// A failed boot shuts the event bus down before the error is returned,
    /// so no listener registered by a partially booted plugin keeps running.
    pub async fn boot(
        &mut self,
        source: &dyn PluginSource,
        migrator: &dyn SchemaMigrator,
    ) -> RuntimeResult<&BootReport> {
        if self.report.is_some() {
            return Err(RuntimeError::AlreadyBooted);
        }

        match self.collect_and_boot(source, migrator).await {
            Ok(report) => {
                info!(
                    plugins = self.manager.plugin_count(),
                    tiers = report.tiers.len(),
                    "Runtime booted"
                );
                Ok(self.report.insert(report))
            }
            Err(err) => {
                error!(error = %err, plugin = ?err.plugin_id(), "Boot aborted");
                if let Err(shutdown_err) = self.bus.shutdown().await {
                    warn!(error = %shutdown_err, "Event bus shutdown after failed boot");
                }
                Err(err)
            }
        }
    }

    async fn collect_and_boot(
        &mut self,
        source: &dyn PluginSource,
        migrator: &dyn SchemaMigrator,
    ) -> RuntimeResult<BootReport> {
        self.manager
            .provide_core_service(EVENTS, Arc::clone(&self.bus))?;
        self.manager.collect(source)?;
        Ok(self.manager.boot(migrator).await?)
    }

    /// Runs until Ctrl+C (or SIGTERM on unix), then shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Runs until `shutdown` completes, then shuts down.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.report.is_none() {
            return Err(RuntimeError::NotBooted);
        }

        info!("Trellis runtime is now running");
        shutdown.await;
        self.shutdown().await
    }

    /// Removes every listener of this process and closes the transport.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        self.bus.shutdown().await?;
        info!("Runtime stopped");
        Ok(())
    }
}

impl fmt::Debug for TrellisRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrellisRuntime")
            .field("bus", &self.bus)
            .field("phase", &self.manager.phase())
            .field("booted", &self.report.is_some())
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(err) => warn!(error = %err, "Cannot listen for SIGTERM"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!(error = %err, "Cannot listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

enum TransportChoice {
    /// A fresh fabric sized by `events.retention_limit`.
    Default,
    Fabric(Arc<MemoryFabric>),
    Custom(BoxedTransport),
}

/// Builder for a [`TrellisRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    transport: TransportChoice,
    init_logging: bool,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Without search paths the loader looks in the current directory and
    /// the user config directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            transport: TransportChoice::Default,
            init_logging: true,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path, replacing the default locations.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables loading environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a configuration over every other source.
    pub fn merge(mut self, config: TrellisConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Sets one configuration key over every other source.
    pub fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Joins an existing fabric, e.g. to simulate several instances.
    pub fn fabric(mut self, fabric: Arc<MemoryFabric>) -> Self {
        self.transport = TransportChoice::Fabric(fabric);
        self
    }

    /// Uses `transport` instead of the memory fabric.
    pub fn transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = TransportChoice::Custom(transport);
        self
    }

    /// Whether `build` installs the global log subscriber (default: true).
    pub fn logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    /// Loads the configuration, sets up logging and connects the event bus.
    pub async fn build(self) -> RuntimeResult<TrellisRuntime> {
        let config = self.config_loader.load()?;
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let transport: BoxedTransport = match self.transport {
            TransportChoice::Default => Arc::new(
                MemoryFabric::with_retention_limit(config.events.retention_limit)
                    .connection(config.events.instance_name()),
            ),
            TransportChoice::Fabric(fabric) => {
                Arc::new(fabric.connection(config.events.instance_name()))
            }
            TransportChoice::Custom(transport) => transport,
        };

        TrellisRuntime::from_config(config, transport).await
    }
}
