//! Service tokens and the process-wide service registry.
//!
//! A [`ServiceRef<T>`] is a `Copy` token pairing a string id with the Rust
//! type of the implementation.  Tokens are declared once as constants by the
//! plugin that owns the slot:
//!
//! ```rust,ignore
//! pub trait CatalogDb: Send + Sync {
//!     fn entity(&self, name: &str) -> Option<Entity>;
//! }
//!
//! pub const CATALOG_DB: ServiceRef<dyn CatalogDb> = ServiceRef::new("catalog.db");
//! ```
//!
//! The [`ServiceRegistry`] stores one implementation per id.  It is filled
//! while plugins are collected and is read-only once the host has booted, so
//! lookups take `&self` and need no locking.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ServiceError, ServiceResult};

/// Type-erased service value as stored in the registry.
///
/// The inner `dyn Any` is always an `Arc<T>` for the `T` of the reference it
/// was registered under, so `dyn Trait` services survive the erasure.
pub type ServiceArc = Arc<dyn Any + Send + Sync>;

// =============================================================================
// ServiceRef
// =============================================================================

/// Typed token identifying one singleton service slot.
///
/// `T` is usually a `dyn Trait`; it only exists at compile time.
pub struct ServiceRef<T: ?Sized> {
    id: &'static str,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> ServiceRef<T> {
    /// Creates a new token.  Has no side effects.
    pub const fn new(id: &'static str) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Returns the service id.
    pub const fn id(&self) -> &'static str {
        self.id
    }

    /// Returns the name of the implementation type carried by this token.
    pub fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T: ?Sized> Clone for ServiceRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for ServiceRef<T> {}

impl<T: ?Sized> PartialEq for ServiceRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: ?Sized> Eq for ServiceRef<T> {}

impl<T: ?Sized> Hash for ServiceRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for ServiceRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRef")
            .field("id", &self.id)
            .field("type", &self.type_name())
            .finish()
    }
}

impl<T: ?Sized> fmt::Display for ServiceRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id)
    }
}

/// Recovers the typed implementation from an erased registry value.
pub fn downcast_service<T>(id: &str, value: &ServiceArc) -> ServiceResult<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    value
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or_else(|| ServiceError::TypeMismatch {
            id: id.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

// =============================================================================
// ServiceRegistry
// =============================================================================

struct ServiceEntry {
    /// Plugin that registered the service; `None` for core services.
    owner: Option<String>,
    value: ServiceArc,
}

/// Lookup table from service id to its single implementation.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<&'static str, ServiceEntry>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a core-provided implementation.
    ///
    /// Core services have no owning plugin and are always ready.
    pub fn register<T>(&mut self, service: ServiceRef<T>, implementation: Arc<T>) -> ServiceResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(service, implementation, None)
    }

    /// Registers an implementation owned by `plugin_id`.
    pub fn register_owned<T>(
        &mut self,
        service: ServiceRef<T>,
        implementation: Arc<T>,
        plugin_id: &str,
    ) -> ServiceResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(service, implementation, Some(plugin_id.to_string()))
    }

    /// Inserts an already-erased value.  The value must hold an `Arc<T>`.
    pub fn register_erased(
        &mut self,
        id: &'static str,
        value: ServiceArc,
        owner: Option<String>,
    ) -> ServiceResult<()> {
        if self.services.contains_key(id) {
            return Err(ServiceError::duplicate(id));
        }
        debug!(service = id, owner = owner.as_deref().unwrap_or("core"), "Service registered");
        self.services.insert(id, ServiceEntry { owner, value });
        Ok(())
    }

    fn insert<T>(
        &mut self,
        service: ServiceRef<T>,
        implementation: Arc<T>,
        owner: Option<String>,
    ) -> ServiceResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_erased(service.id(), Arc::new(implementation), owner)
    }

    /// Returns the implementation registered for `service`.
    ///
    /// Every call returns a clone of the same `Arc`.
    pub fn get<T>(&self, service: ServiceRef<T>) -> ServiceResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let value = self.resolve(service.id())?;
        downcast_service::<T>(service.id(), value)
    }

    /// Returns the erased value registered under `id`.
    pub fn resolve(&self, id: &str) -> ServiceResult<&ServiceArc> {
        self.services
            .get(id)
            .map(|entry| &entry.value)
            .ok_or_else(|| ServiceError::not_found(id))
    }

    /// Returns `true` if an implementation exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Returns the plugin that registered `id`.
    ///
    /// `None` both for unknown ids and for core services; use
    /// [`contains`](Self::contains) to tell them apart.
    pub fn owner(&self, id: &str) -> Option<&str> {
        self.services.get(id).and_then(|entry| entry.owner.as_deref())
    }

    /// Iterates over all registered ids.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.services.keys().copied()
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.services.keys().collect();
        ids.sort();
        f.debug_struct("ServiceRegistry")
            .field("services", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    const GREETER: ServiceRef<dyn Greeter> = ServiceRef::new("test.greeter");

    #[test]
    fn test_get_before_registration_fails() {
        let registry = ServiceRegistry::new();
        let err = registry.get(GREETER).err();
        assert_eq!(err, Some(ServiceError::not_found("test.greeter")));
    }

    #[test]
    fn test_get_returns_same_identity() {
        let mut registry = ServiceRegistry::new();
        let implementation: Arc<dyn Greeter> = Arc::new(English);
        registry.register(GREETER, Arc::clone(&implementation)).unwrap();

        let first = registry.get(GREETER).unwrap();
        let second = registry.get(GREETER).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &implementation));
        assert_eq!(first.greet(), "hello");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ServiceRegistry::new();
        registry.register(GREETER, Arc::new(English)).unwrap();
        let err = registry.register(GREETER, Arc::new(English)).unwrap_err();
        assert_eq!(err, ServiceError::duplicate("test.greeter"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_type_mismatch_detected() {
        const AS_STRING: ServiceRef<String> = ServiceRef::new("test.greeter");

        let mut registry = ServiceRegistry::new();
        registry.register(GREETER, Arc::new(English)).unwrap();
        assert!(matches!(
            registry.get(AS_STRING),
            Err(ServiceError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_owner_tracking() {
        const CORE: ServiceRef<String> = ServiceRef::new("core.name");

        let mut registry = ServiceRegistry::new();
        registry.register(CORE, Arc::new("host".to_string())).unwrap();
        registry
            .register_owned(GREETER, Arc::new(English), "greetings")
            .unwrap();

        assert_eq!(registry.owner("test.greeter"), Some("greetings"));
        assert_eq!(registry.owner("core.name"), None);
        assert!(registry.contains("core.name"));
        assert!(!registry.contains("missing"));
    }
}
