//! Catalog plugin: the entity store every other plugin builds on.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use trellis::prelude::*;

use crate::search::{SEARCH_PROVIDERS, SearchHit, SearchProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub owner: String,
    pub status: EntityStatus,
    pub revision: u32,
}

/// Broadcast to every instance whenever an entity is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChanged {
    pub entity: String,
    pub status: EntityStatus,
    pub revision: u32,
}

impl From<&Entity> for EntityChanged {
    fn from(entity: &Entity) -> Self {
        Self {
            entity: entity.name.clone(),
            status: entity.status,
            revision: entity.revision,
        }
    }
}

pub trait CatalogStore: Send + Sync {
    fn get(&self, name: &str) -> Option<Entity>;
    fn list(&self) -> Vec<Entity>;
    /// Inserts or updates `name`, bumping its revision.
    fn upsert(&self, name: &str, owner: &str, status: EntityStatus) -> Entity;
}

pub const CATALOG_DB: ServiceRef<dyn CatalogStore> = ServiceRef::new("catalog.db");
pub const ENTITY_CHANGED: Hook<EntityChanged> = Hook::new("catalog.entity.changed");

#[derive(Default)]
pub struct InMemoryCatalog {
    entities: RwLock<BTreeMap<String, Entity>>,
}

impl InMemoryCatalog {
    /// A catalog with a few services, one of them degraded.
    pub fn seeded() -> Self {
        let catalog = Self::default();
        catalog.upsert("checkout", "team-payments", EntityStatus::Healthy);
        catalog.upsert("inventory", "team-fulfilment", EntityStatus::Healthy);
        catalog.upsert("ledger", "team-payments", EntityStatus::Degraded);
        catalog
    }
}

impl CatalogStore for InMemoryCatalog {
    fn get(&self, name: &str) -> Option<Entity> {
        self.entities.read().get(name).cloned()
    }

    fn list(&self) -> Vec<Entity> {
        self.entities.read().values().cloned().collect()
    }

    fn upsert(&self, name: &str, owner: &str, status: EntityStatus) -> Entity {
        let mut entities = self.entities.write();
        let revision = entities.get(name).map_or(1, |e| e.revision + 1);
        let entity = Entity {
            name: name.to_string(),
            owner: owner.to_string(),
            status,
            revision,
        };
        entities.insert(name.to_string(), entity.clone());
        entity
    }
}

struct CatalogSearch {
    store: Arc<dyn CatalogStore>,
}

impl SearchProvider for CatalogSearch {
    fn name(&self) -> &str {
        "catalog"
    }

    fn search(&self, query: &str) -> Vec<SearchHit> {
        self.store
            .list()
            .into_iter()
            .filter(|e| e.name.contains(query) || e.owner.contains(query))
            .map(|e| SearchHit {
                provider: "catalog".into(),
                title: format!("{} (owner {})", e.name, e.owner),
            })
            .collect()
    }
}

#[trellis::plugin("catalog")]
fn catalog_plugin(env: &mut RegistrationEnv) {
    let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalog::seeded());
    env.register_service(CATALOG_DB, Arc::clone(&store));
    env.register_permissions([
        Permission::new("catalog.entity.read", PermissionAction::Read).on("entity"),
        Permission::new("catalog.entity.update", PermissionAction::Update).on("entity"),
    ]);

    let announce = Arc::clone(&store);
    env.register_init(
        InitDescriptor::new()
            .dep("events", EVENTS)
            .dep("search", SEARCH_PROVIDERS)
            .schema(json!({
                "tables": {
                    "entities": ["name", "owner", "status", "revision"]
                }
            }))
            .init(move |deps| async move {
                deps.get(SEARCH_PROVIDERS)?
                    .contribute(Arc::new(CatalogSearch { store }));
                Ok(())
            })
            // Every listener is attached once phase 1 is over.
            .after_plugins_ready(move |deps| async move {
                let bus = deps.get(EVENTS)?;
                for entity in announce.list() {
                    bus.emit(ENTITY_CHANGED, &EntityChanged::from(&entity)).await?;
                }
                Ok(())
            }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_bumps_revision() {
        let catalog = InMemoryCatalog::seeded();
        assert_eq!(catalog.get("checkout").map(|e| e.revision), Some(1));

        let updated = catalog.upsert("checkout", "team-payments", EntityStatus::Degraded);
        assert_eq!(updated.revision, 2);
        assert_eq!(catalog.list().len(), 3);
    }

    #[test]
    fn test_catalog_search_matches_owner() {
        let search = CatalogSearch {
            store: Arc::new(InMemoryCatalog::seeded()),
        };
        let hits = search.search("team-payments");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.provider == "catalog"));
    }
}
