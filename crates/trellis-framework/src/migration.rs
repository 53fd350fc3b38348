//! Boundary to the persistence layer's migration engine.
//!
//! The manager hands every collected schema descriptor to a
//! [`SchemaMigrator`] in dependency order, before any phase-1 init runs.
//! What a schema descriptor contains is up to the migrator.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use trellis_core::BoxError;

/// Applies plugin schemas.
#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    /// Brings the store in line with `schema` for `plugin_id`.
    async fn migrate(&self, plugin_id: &str, schema: &Value) -> Result<(), BoxError>;
}

/// Accepts every schema without touching anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMigrator;

#[async_trait]
impl SchemaMigrator for NoopMigrator {
    async fn migrate(&self, plugin_id: &str, _schema: &Value) -> Result<(), BoxError> {
        debug!(plugin = %plugin_id, "Schema accepted by no-op migrator");
        Ok(())
    }
}
