//! Search plugin: owns the `search.providers` extension point and rebuilds
//! its index from a work-queue hook.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;
use trellis::prelude::*;

/// One result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub provider: String,
    pub title: String,
}

/// Something other plugins contribute to make their data searchable.
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;
    fn search(&self, query: &str) -> Vec<SearchHit>;
}

pub const SEARCH_PROVIDERS_POINT: ExtensionPoint<dyn SearchProvider> =
    ExtensionPoint::new("search.providers");

/// The contribution list behind [`SEARCH_PROVIDERS_POINT`].
pub const SEARCH_PROVIDERS: ServiceRef<Extensions<dyn SearchProvider>> =
    ServiceRef::new("search.providers");

pub const SEARCH: ServiceRef<SearchService> = ServiceRef::new("search.service");

/// Index rebuild request; exactly one instance handles each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexRequest {
    pub reason: String,
}

pub const REINDEX: Hook<ReindexRequest> = Hook::new("search.index.rebuild");

pub struct SearchService {
    providers: Arc<Extensions<dyn SearchProvider>>,
    rebuilds: AtomicUsize,
}

impl SearchService {
    /// Queries every contributed provider in contribution order.
    pub fn query(&self, query: &str) -> Vec<SearchHit> {
        self.providers
            .all()
            .iter()
            .flat_map(|provider| provider.search(query))
            .collect()
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .all()
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }
}

#[trellis::plugin("search")]
fn search_plugin(env: &mut RegistrationEnv) {
    let providers = Arc::new(Extensions::new(SEARCH_PROVIDERS_POINT));
    let service = Arc::new(SearchService {
        providers: Arc::clone(&providers),
        rebuilds: AtomicUsize::new(0),
    });
    env.register_service(SEARCH_PROVIDERS, providers);
    env.register_service(SEARCH, Arc::clone(&service));

    let ready = Arc::clone(&service);
    env.register_init(
        InitDescriptor::new()
            .dep("events", EVENTS)
            .init(move |deps| async move {
                let bus = deps.get(EVENTS)?;
                bus.subscribe(
                    deps.plugin_id(),
                    REINDEX,
                    move |request: ReindexRequest| {
                        let rebuilds = service.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
                        info!(reason = %request.reason, rebuilds, "Search index rebuilt");
                        async { Ok(()) }
                    },
                    SubscribeOptions::work_queue(),
                )
                .await?;
                Ok(())
            })
            .after_plugins_ready(move |_deps| async move {
                info!(providers = ?ready.provider_names(), "Search providers wired");
                Ok(())
            }),
    );
}
