//! Init descriptors and the dependency bundle handed to init callbacks.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use trellis_core::{
    BoxError, ServiceArc, ServiceError, ServiceRef, ServiceRegistry, ServiceResult,
    downcast_service,
};

/// Boxed init or after-plugins-ready callback.  Consumed exactly once.
pub type InitFn = Box<dyn FnOnce(Deps) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// What a plugin hands to `register_init`.
///
/// ```rust,ignore
/// env.register_init(
///     InitDescriptor::new()
///         .dep("db", CATALOG_DB)
///         .init(|deps| async move {
///             let db = deps.get(CATALOG_DB)?;
///             db.warm_up().await?;
///             Ok(())
///         }),
/// );
/// ```
#[derive(Default)]
pub struct InitDescriptor {
    pub(crate) deps: Vec<(String, &'static str)>,
    pub(crate) init: Option<InitFn>,
    pub(crate) after_plugins_ready: Option<InitFn>,
    pub(crate) schema: Option<Value>,
}

impl InitDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a dependency on `service`, reachable as `name` in [`Deps`].
    ///
    /// Declaring a dependency also orders this plugin after the plugin that
    /// registers the service.
    pub fn dep<T: ?Sized>(mut self, name: impl Into<String>, service: ServiceRef<T>) -> Self {
        self.deps.push((name.into(), service.id()));
        self
    }

    /// Sets the phase-1 callback.
    pub fn init<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(Deps) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.init = Some(Box::new(move |deps| f(deps).boxed()));
        self
    }

    /// Sets the phase-2 callback, run once every phase-1 init has resolved.
    pub fn after_plugins_ready<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(Deps) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.after_plugins_ready = Some(Box::new(move |deps| f(deps).boxed()));
        self
    }

    /// Attaches a schema descriptor for the migrator.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Service ids this descriptor depends on.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.deps.iter().map(|(_, id)| *id)
    }
}

impl fmt::Debug for InitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitDescriptor")
            .field("deps", &self.deps)
            .field("init", &self.init.is_some())
            .field("after_plugins_ready", &self.after_plugins_ready.is_some())
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

// =============================================================================
// Deps
// =============================================================================

/// Resolved dependencies of one plugin.
///
/// Holds clones of the registry's `Arc`s, so every accessor returns the very
/// object the provider registered.
#[derive(Clone)]
pub struct Deps {
    plugin_id: Arc<str>,
    entries: Arc<HashMap<String, (&'static str, ServiceArc)>>,
}

impl Deps {
    /// Resolves the declared `deps` against `registry`.
    ///
    /// Fails on the first dependency without an implementation.
    pub(crate) fn resolve(
        plugin_id: &str,
        deps: &[(String, &'static str)],
        registry: &ServiceRegistry,
    ) -> ServiceResult<Self> {
        let mut entries = HashMap::with_capacity(deps.len());
        for (name, id) in deps {
            let value = registry.resolve(id)?;
            entries.insert(name.clone(), (*id, Arc::clone(value)));
        }
        Ok(Self {
            plugin_id: Arc::from(plugin_id),
            entries: Arc::new(entries),
        })
    }

    /// The plugin these dependencies were resolved for.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Returns the implementation of a declared dependency by token.
    pub fn get<T>(&self, service: ServiceRef<T>) -> ServiceResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (id, value) = self
            .entries
            .values()
            .find(|(id, _)| *id == service.id())
            .ok_or_else(|| ServiceError::not_found(service.id()))?;
        downcast_service::<T>(id, value)
    }

    /// Returns the implementation declared under `name`.
    pub fn named<T>(&self, name: &str) -> ServiceResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (id, value) = self
            .entries
            .get(name)
            .ok_or_else(|| ServiceError::not_found(name))?;
        downcast_service::<T>(id, value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Deps")
            .field("plugin_id", &self.plugin_id)
            .field("names", &names)
            .finish()
    }
}
