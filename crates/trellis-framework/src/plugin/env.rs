//! The environment handed to a plugin's `register` function.

use std::fmt;
use std::sync::Arc;

use trellis_core::{ServiceArc, ServiceRef};

use super::init::InitDescriptor;
use super::record::Permission;

/// Collects one plugin's registrations.
///
/// All methods are synchronous and only record what the plugin declares;
/// the manager validates and applies the result once `register` returns.
pub struct RegistrationEnv {
    plugin_id: String,
    pub(crate) services: Vec<(&'static str, ServiceArc)>,
    pub(crate) init: Option<InitDescriptor>,
    pub(crate) init_calls: usize,
    pub(crate) permissions: Vec<Permission>,
}

impl RegistrationEnv {
    pub(crate) fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            services: Vec::new(),
            init: None,
            init_calls: 0,
            permissions: Vec::new(),
        }
    }

    /// The id of the plugin being registered.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Provides the implementation behind `service`.
    ///
    /// Registering an id that some plugin (or core) already provides fails
    /// the boot with a duplicate-service error.
    pub fn register_service<T>(&mut self, service: ServiceRef<T>, implementation: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.push((service.id(), Arc::new(implementation)));
    }

    /// Registers the plugin's init descriptor.  At most one per plugin.
    pub fn register_init(&mut self, init: InitDescriptor) {
        self.init_calls += 1;
        if self.init.is_none() {
            self.init = Some(init);
        }
    }

    /// Declares permissions for the authorization subsystem.
    pub fn register_permissions(&mut self, permissions: impl IntoIterator<Item = Permission>) {
        self.permissions.extend(permissions);
    }
}

impl fmt::Debug for RegistrationEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services: Vec<&str> = self.services.iter().map(|(id, _)| *id).collect();
        f.debug_struct("RegistrationEnv")
            .field("plugin_id", &self.plugin_id)
            .field("services", &services)
            .field("init", &self.init)
            .field("permissions", &self.permissions)
            .finish()
    }
}
