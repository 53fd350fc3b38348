//! Incident plugin: opens an incident whenever a catalog entity degrades.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use trellis::prelude::*;

use crate::catalog::{CATALOG_DB, ENTITY_CHANGED, EntityStatus};
use crate::search::{SEARCH_PROVIDERS, SearchHit, SearchProvider};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Incident {
    pub entity: String,
    pub owner: String,
    pub revision: u32,
}

/// Open incidents, at most one per entity revision.
#[derive(Debug, Default)]
pub struct IncidentLog {
    open: Mutex<Vec<Incident>>,
}

impl IncidentLog {
    /// Returns `false` if this revision already has an incident.
    pub fn open(&self, incident: Incident) -> bool {
        let mut open = self.open.lock();
        if open
            .iter()
            .any(|i| i.entity == incident.entity && i.revision == incident.revision)
        {
            return false;
        }
        open.push(incident);
        true
    }

    pub fn snapshot(&self) -> Vec<Incident> {
        self.open.lock().clone()
    }
}

pub const INCIDENTS: ServiceRef<IncidentLog> = ServiceRef::new("incident.log");

struct IncidentSearch {
    log: Arc<IncidentLog>,
}

impl SearchProvider for IncidentSearch {
    fn name(&self) -> &str {
        "incident"
    }

    fn search(&self, query: &str) -> Vec<SearchHit> {
        self.log
            .snapshot()
            .into_iter()
            .filter(|i| i.entity.contains(query) || i.owner.contains(query))
            .map(|i| SearchHit {
                provider: "incident".into(),
                title: format!("{} degraded at revision {}", i.entity, i.revision),
            })
            .collect()
    }
}

#[trellis::plugin("incident")]
fn incident_plugin(env: &mut RegistrationEnv) {
    let log = Arc::new(IncidentLog::default());
    env.register_service(INCIDENTS, Arc::clone(&log));
    env.register_permissions([
        Permission::new("incident.ticket.create", PermissionAction::Create).on("incident"),
        Permission::new("catalog.entity.read", PermissionAction::Read).on("entity"),
    ]);

    env.register_init(
        InitDescriptor::new()
            .dep("catalog", CATALOG_DB)
            .dep("events", EVENTS)
            .dep("search", SEARCH_PROVIDERS)
            .init(move |deps| async move {
                let catalog = deps.get(CATALOG_DB)?;
                let bus = deps.get(EVENTS)?;
                deps.get(SEARCH_PROVIDERS)?.contribute(Arc::new(IncidentSearch {
                    log: Arc::clone(&log),
                }));

                bus.subscribe(
                    deps.plugin_id(),
                    ENTITY_CHANGED,
                    move |change| {
                        if change.status == EntityStatus::Degraded {
                            let owner = catalog
                                .get(&change.entity)
                                .map(|e| e.owner)
                                .unwrap_or_default();
                            let opened = log.open(Incident {
                                entity: change.entity.clone(),
                                owner,
                                revision: change.revision,
                            });
                            if opened {
                                warn!(
                                    entity = %change.entity,
                                    revision = change.revision,
                                    "Incident opened"
                                );
                            }
                        }
                        async { Ok(()) }
                    },
                    SubscribeOptions::broadcast(),
                )
                .await?;
                Ok(())
            }),
    );
}
