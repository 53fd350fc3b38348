//! Catalog / incident / search plugins for the demo host.
//!
//! Boot order is decided by the services each plugin consumes:
//!
//! ```text
//! tier 0: search    (owns search.providers)
//! tier 1: catalog   (contributes to search.providers, provides catalog.db)
//! tier 2: incident  (consumes catalog.db, contributes to search.providers)
//! ```

use std::time::Duration;

use anyhow::Context;
use trellis::framework::{LinkedPluginSource, PluginSource, StaticPluginSource};
use trellis::prelude::*;
use trellis::runtime::RuntimeResult;

pub mod catalog;
pub mod incident;
pub mod search;

use catalog::{CATALOG_DB, ENTITY_CHANGED, EntityChanged, EntityStatus};
use incident::{INCIDENTS, Incident};
use search::{REINDEX, ReindexRequest, SEARCH, SearchHit};

/// The linked plugins, optionally without the catalog.
pub fn plugin_source(with_catalog: bool) -> StaticPluginSource {
    let source = StaticPluginSource::new(LinkedPluginSource.descriptors());
    if with_catalog {
        source
    } else {
        source.without("catalog")
    }
}

/// Process exit status once the host has stopped.
///
/// A stop error keeps its own status; a failed walkthrough after a clean stop
/// exits with 1.
pub fn exit_status(walkthrough_failed: bool, stopped: &RuntimeResult<()>) -> u8 {
    match stopped {
        Err(err) => err.exit_status(),
        Ok(()) if walkthrough_failed => 1,
        Ok(()) => 0,
    }
}

/// What [`walkthrough`] observed.
#[derive(Debug)]
pub struct Walkthrough {
    pub incidents: Vec<Incident>,
    pub hits: Vec<SearchHit>,
    pub rebuilds: usize,
}

/// Degrades an entity, requests a reindex and queries search.
pub async fn walkthrough(runtime: &TrellisRuntime) -> anyhow::Result<Walkthrough> {
    let manager = runtime.manager();
    let catalog = manager.get(CATALOG_DB)?;
    let incidents = manager.get(INCIDENTS)?;
    let search = manager.get(SEARCH)?;
    let bus = runtime.bus();

    // The catalog's phase-2 announcements arrive over the transport.
    let announced = settle(|| !incidents.snapshot().is_empty()).await;
    tracing::info!(announced, "Catalog announcements processed");

    let entity = catalog.upsert("checkout", "team-payments", EntityStatus::Degraded);
    let report = bus
        .emit_local(ENTITY_CHANGED, EntityChanged::from(&entity))
        .await;
    anyhow::ensure!(report.is_clean(), "listeners failed: {:?}", report.failures);

    bus.emit(
        REINDEX,
        &ReindexRequest {
            reason: format!("{} changed", entity.name),
        },
    )
    .await
    .context("requesting reindex")?;
    settle(|| search.rebuilds() > 0).await;

    Ok(Walkthrough {
        incidents: incidents.snapshot(),
        hits: search.query("team-payments"),
        rebuilds: search.rebuilds(),
    })
}

/// Polls `done` for up to a second.
async fn settle(done: impl Fn() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
