//! Where plugin descriptors come from.
//!
//! The manager never discovers plugins itself; it asks a [`PluginSource`].
//! Two sources ship with the framework:
//!
//! - [`StaticPluginSource`]: an explicit, ordered list built by the host;
//! - [`LinkedPluginSource`]: every plugin compiled into the binary through
//!   the `#[plugin("id")]` attribute.

use super::descriptor::{PLUGIN_REGISTRY, PluginDescriptor};

/// Yields the descriptors of every plugin to boot.
pub trait PluginSource: Send + Sync {
    /// Source name used in logs.
    fn name(&self) -> &str;

    /// Returns the descriptors in collection order.
    fn descriptors(&self) -> Vec<PluginDescriptor>;
}

/// A fixed list of descriptors.
#[derive(Debug, Clone, Default)]
pub struct StaticPluginSource {
    descriptors: Vec<PluginDescriptor>,
}

impl StaticPluginSource {
    /// Creates a source from a list of descriptors.
    pub fn new(descriptors: impl IntoIterator<Item = PluginDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into_iter().collect(),
        }
    }

    /// Appends a descriptor.
    pub fn with(mut self, descriptor: PluginDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Removes every descriptor whose id is `id`.
    pub fn without(mut self, id: &str) -> Self {
        self.descriptors.retain(|d| d.id() != id);
        self
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl PluginSource for StaticPluginSource {
    fn name(&self) -> &str {
        "static"
    }

    fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.descriptors.clone()
    }
}

/// Plugins enrolled at link time with `#[plugin("id")]`.
///
/// Link order is unspecified, so descriptors are sorted by id to keep
/// collection deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedPluginSource;

impl PluginSource for LinkedPluginSource {
    fn name(&self) -> &str {
        "linked"
    }

    fn descriptors(&self) -> Vec<PluginDescriptor> {
        let mut descriptors: Vec<PluginDescriptor> =
            PLUGIN_REGISTRY.iter().map(|make| make()).collect();
        descriptors.sort_by(|a, b| a.id().cmp(b.id()));
        descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(id: &'static str) -> PluginDescriptor {
        PluginDescriptor::new(id, |_env| {})
    }

    #[test]
    fn test_static_source_keeps_order() {
        let source = StaticPluginSource::new([noop("b"), noop("a")]).with(noop("c"));
        let ids: Vec<String> = source
            .descriptors()
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_without_removes_plugin() {
        let source = StaticPluginSource::new([noop("catalog"), noop("incident")]).without("catalog");
        assert_eq!(source.len(), 1);
        assert_eq!(source.descriptors()[0].id(), "incident");
    }
}
