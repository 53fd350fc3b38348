//! Extension points: named seams that several plugins contribute into.
//!
//! An [`ExtensionPoint<T>`] has the same shape as a
//! [`ServiceRef`](crate::ServiceRef) but names a collection instead of a single
//! owned implementation.  The token itself has no behaviour; whoever holds it
//! decides what "contributing" means.  [`Extensions<T>`] is the ready-made
//! collection most plugins expose behind a point.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

/// Typed token for a multi-contributor extension seam.
pub struct ExtensionPoint<T: ?Sized> {
    id: &'static str,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> ExtensionPoint<T> {
    /// Creates a new extension point token.
    pub const fn new(id: &'static str) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Returns the extension point id.
    pub const fn id(&self) -> &'static str {
        self.id
    }
}

impl<T: ?Sized> Clone for ExtensionPoint<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for ExtensionPoint<T> {}

impl<T: ?Sized> PartialEq for ExtensionPoint<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: ?Sized> Eq for ExtensionPoint<T> {}

impl<T: ?Sized> Hash for ExtensionPoint<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for ExtensionPoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPoint")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

// =============================================================================
// Extensions
// =============================================================================

/// Append-only list of contributions behind an [`ExtensionPoint`].
///
/// Contributions are kept in the order they arrive.
pub struct Extensions<T: ?Sized> {
    point: ExtensionPoint<T>,
    items: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized + Send + Sync> Extensions<T> {
    /// Creates an empty collection for `point`.
    pub fn new(point: ExtensionPoint<T>) -> Self {
        Self {
            point,
            items: RwLock::new(Vec::new()),
        }
    }

    /// The point this collection belongs to.
    pub fn point(&self) -> ExtensionPoint<T> {
        self.point
    }

    /// Adds a contribution.
    pub fn contribute(&self, item: Arc<T>) {
        self.items.write().push(item);
    }

    /// Snapshot of every contribution so far.
    pub fn all(&self) -> Vec<Arc<T>> {
        self.items.read().clone()
    }

    /// Number of contributions.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns `true` if nobody has contributed yet.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl<T: ?Sized> fmt::Debug for Extensions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("point", &self.point.id)
            .field("len", &self.items.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Provider: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Named(&'static str);

    impl Provider for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    const PROVIDERS: ExtensionPoint<dyn Provider> = ExtensionPoint::new("search.providers");

    #[test]
    fn test_contributions_keep_order() {
        let ext = Extensions::new(PROVIDERS);
        assert!(ext.is_empty());

        ext.contribute(Arc::new(Named("catalog")));
        ext.contribute(Arc::new(Named("incident")));

        let names: Vec<String> = ext.all().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["catalog", "incident"]);
        assert_eq!(ext.point().id(), "search.providers");
    }

    #[test]
    fn test_point_identity() {
        const SAME: ExtensionPoint<dyn Provider> = ExtensionPoint::new("search.providers");
        assert_eq!(PROVIDERS, SAME);
    }
}
