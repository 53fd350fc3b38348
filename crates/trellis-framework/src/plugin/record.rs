//! Aggregated per-plugin view for the authorization and migration collaborators.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A permission declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Fully qualified name, e.g. `catalog.entity.read`.
    pub name: String,
    /// Kind of resource the permission guards, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// The action it allows.
    pub action: PermissionAction,
}

impl Permission {
    pub fn new(name: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            name: name.into(),
            resource_type: None,
            action,
        }
    }

    /// Scopes the permission to a resource type.
    pub fn on(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Create,
    Read,
    Update,
    Delete,
}

/// Everything a plugin declared during collection, minus its callbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRecord {
    pub plugin_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub permissions: Vec<Permission>,
    /// Service ids the plugin registered.
    pub provides: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}
