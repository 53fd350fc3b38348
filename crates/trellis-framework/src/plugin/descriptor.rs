//! Plugin descriptor: the id plus the `register` entry point of one plugin.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use linkme::distributed_slice;

use super::env::RegistrationEnv;

/// Synchronous registration entry point of a plugin.
pub type RegisterFn = Arc<dyn Fn(&mut RegistrationEnv) + Send + Sync>;

/// Identifies a plugin and how to register it.
///
/// `register` runs exactly once per boot, synchronously, and must not perform
/// I/O.  Everything asynchronous belongs in the init descriptor it registers.
#[derive(Clone)]
pub struct PluginDescriptor {
    id: Cow<'static, str>,
    path: Option<Cow<'static, str>>,
    register: RegisterFn,
}

impl PluginDescriptor {
    /// Creates a descriptor from an id and a register function.
    pub fn new<F>(id: impl Into<Cow<'static, str>>, register: F) -> Self
    where
        F: Fn(&mut RegistrationEnv) + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            path: None,
            register: Arc::new(register),
        }
    }

    /// Attaches the location the plugin was loaded from.
    pub fn with_path(mut self, path: impl Into<Cow<'static, str>>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The plugin id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the plugin came from, if known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub(crate) fn register(&self, env: &mut RegistrationEnv) {
        (self.register)(env)
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ─── Link-time registry ───────────────────────────────────────────────────────

/// Descriptor constructors enrolled by `#[plugin("id")]`.
///
/// Read through [`LinkedPluginSource`](super::LinkedPluginSource).
#[distributed_slice]
pub static PLUGIN_REGISTRY: [fn() -> PluginDescriptor];
