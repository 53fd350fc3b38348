//! Plugin collection, dependency ordering and the two-phase boot.
//!
//! [`PluginManager`] owns every registration made by the plugins of one
//! host process.  It:
//!
//! - Runs each plugin's `register` exactly once while [`collect`]ing from a
//!   [`PluginSource`], merging declared services into the [`ServiceRegistry`].
//! - Orders plugins into **tiers** with Kahn's algorithm: plugin P depends on
//!   plugin Q when one of P's declared deps is a service Q registered.  Core
//!   services and unknown ids create no edge.
//! - Applies schemas through a [`SchemaMigrator`] in that order.
//! - Runs phase 1 (`init`) tier by tier, concurrently within a tier, then
//!   phase 2 (`after_plugins_ready`) for every plugin at once.
//!
//! Every failure is fatal and leaves the manager in [`BootPhase::Failed`].
//!
//! ```text
//! new() ──► Collecting ──boot()──► Ordering ──► Phase1Init ──► Phase2Ready ──► Running
//!                │                    │             │               │
//!                └────────────────────┴─────────────┴───────────────┴──► Failed
//! ```
//!
//! [`collect`]: PluginManager::collect

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future;
use serde::Serialize;
use tracing::{debug, error, info};
use trellis_core::{BoxError, ServiceRef, ServiceRegistry, ServiceResult};

use crate::error::{BootError, BootResult, InitFailure, InitPhase};
use crate::migration::SchemaMigrator;
use crate::plugin::{
    Deps, InitDescriptor, PluginDescriptor, PluginRecord, PluginSource, RegistrationEnv,
};

/// Default timeout for a single `init` or `after_plugins_ready` callback.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Configuration & state
// =============================================================================

/// Knobs for [`PluginManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Per-plugin limit for phase-1 `init`.
    pub init_timeout: Duration,
    /// Per-plugin limit for phase-2 `after_plugins_ready`.
    pub ready_timeout: Duration,
    /// Plugin ids skipped during collection.
    pub disabled: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_CALLBACK_TIMEOUT,
            ready_timeout: DEFAULT_CALLBACK_TIMEOUT,
            disabled: Vec::new(),
        }
    }
}

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootPhase {
    /// Accepting plugins and core services.
    Collecting,
    /// Building the dependency graph.
    Ordering,
    /// Running `init` callbacks.
    Phase1Init,
    /// Running `after_plugins_ready` callbacks.
    Phase2Ready,
    /// Boot finished; the registry is read-only.
    Running,
    /// Boot aborted.
    Failed,
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Collecting => "collecting",
            Self::Ordering => "ordering",
            Self::Phase1Init => "phase1-init",
            Self::Phase2Ready => "phase2-ready",
            Self::Running => "running",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful boot executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootReport {
    /// Plugin ids per phase-1 tier, in execution order.
    pub tiers: Vec<Vec<String>>,
    /// Plugins whose `after_plugins_ready` ran.
    pub ready: Vec<String>,
}

impl BootReport {
    /// Every plugin id in boot order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.tiers.iter().flatten().map(String::as_str)
    }
}

struct PendingPlugin {
    record: PluginRecord,
    init: Option<InitDescriptor>,
}

impl PendingPlugin {
    fn dependency_ids(&self) -> Vec<&'static str> {
        self.init
            .as_ref()
            .map(|init| init.dependency_ids().collect())
            .unwrap_or_default()
    }
}

// =============================================================================
// Dependency ordering
// =============================================================================

/// Groups plugin indices into tiers via Kahn's algorithm.
///
/// Each tier only depends on earlier tiers; within a tier the collection
/// order is kept.  On a cycle, returns the indices along one cycle with the
/// first index repeated at the end.
fn dependency_tiers(
    plugins: &[PendingPlugin],
    registry: &ServiceRegistry,
) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let n = plugins.len();
    let index: HashMap<&str, usize> = plugins
        .iter()
        .enumerate()
        .map(|(i, p)| (p.record.plugin_id.as_str(), i))
        .collect();

    let mut providers: Vec<Vec<usize>> = vec![vec![]; n];
    let mut dependents: Vec<Vec<usize>> = vec![vec![]; n];
    let mut in_degree: Vec<usize> = vec![0; n];

    for (i, plugin) in plugins.iter().enumerate() {
        for service_id in plugin.dependency_ids() {
            let Some(&provider) = registry.owner(service_id).and_then(|o| index.get(o)) else {
                continue;
            };
            if provider == i {
                return Err(vec![i, i]);
            }
            if !providers[i].contains(&provider) {
                providers[i].push(provider);
                dependents[provider].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut tiers: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;

    while !current.is_empty() {
        processed += current.len();
        let mut next: Vec<usize> = Vec::new();
        for &i in &current {
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();
        tiers.push(current);
        current = next;
    }

    if processed != n {
        let remaining: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        return Err(find_cycle(&providers, &remaining));
    }

    Ok(tiers)
}

/// Walks provider edges among the unsorted nodes until one repeats.
///
/// Every node Kahn's algorithm could not process still has an unprocessed
/// provider, so the walk always closes a cycle.
fn find_cycle(providers: &[Vec<usize>], remaining: &[bool]) -> Vec<usize> {
    let Some(start) = remaining.iter().position(|&r| r) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut seen: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&next) = providers[current].iter().find(|&&p| remaining[p]) else {
            return path;
        };
        if let Some(&pos) = seen.get(&next) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(next);
            return cycle;
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

// =============================================================================
// Guarded callback execution
// =============================================================================

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs one plugin callback under a timeout, turning errors and panics into
/// [`BootError::PluginInit`].
async fn run_guarded<F>(
    plugin_id: String,
    phase: InitPhase,
    limit: Duration,
    callback: F,
) -> BootResult<String>
where
    F: Future<Output = Result<(), BoxError>> + Send,
{
    let outcome = tokio::time::timeout(limit, AssertUnwindSafe(callback).catch_unwind()).await;
    let failure = match outcome {
        Ok(Ok(Ok(()))) => {
            debug!(plugin = %plugin_id, %phase, "Plugin callback completed");
            return Ok(plugin_id);
        }
        Ok(Ok(Err(cause))) => InitFailure::Failed(cause),
        Ok(Err(panic)) => InitFailure::Panicked(panic_message(panic.as_ref())),
        Err(_) => InitFailure::TimedOut(limit),
    };
    Err(BootError::plugin_init(plugin_id, phase, failure))
}

// =============================================================================
// PluginManager
// =============================================================================

/// Collects plugins and drives the two-phase boot.
///
/// # Example
///
/// ```rust,ignore
/// let mut manager = PluginManager::new(ManagerConfig::default());
/// manager.provide_core_service(EVENTS, bus)?;
/// manager.collect(&StaticPluginSource::new([catalog(), incident()]))?;
/// let report = manager.boot(&NoopMigrator).await?;
/// ```
pub struct PluginManager {
    config: ManagerConfig,
    phase: BootPhase,
    registry: ServiceRegistry,
    plugins: Vec<PendingPlugin>,
}

impl PluginManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            phase: BootPhase::Collecting,
            registry: ServiceRegistry::new(),
            plugins: Vec::new(),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> BootPhase {
        self.phase
    }

    /// The service registry.  Read-only once boot has started.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Shorthand for `registry().get(service)`.
    pub fn get<T>(&self, service: ServiceRef<T>) -> ServiceResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.get(service)
    }

    /// Collected plugins in collection order.
    pub fn records(&self) -> impl Iterator<Item = &PluginRecord> {
        self.plugins.iter().map(|p| &p.record)
    }

    /// Record of one plugin.
    pub fn record(&self, plugin_id: &str) -> Option<&PluginRecord> {
        self.records().find(|r| r.plugin_id == plugin_id)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    // ─── Collection ──────────────────────────────────────────────────────────

    /// Registers a service owned by the host rather than a plugin.
    ///
    /// Core services never create ordering edges.
    pub fn provide_core_service<T>(
        &mut self,
        service: ServiceRef<T>,
        implementation: Arc<T>,
    ) -> BootResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.expect_phase(BootPhase::Collecting)?;
        self.registry.register(service, implementation)?;
        Ok(())
    }

    /// Runs `register` for every descriptor `source` yields.
    ///
    /// May be called once per source.  Returns the number of plugins added.
    pub fn collect(&mut self, source: &dyn PluginSource) -> BootResult<usize> {
        self.expect_phase(BootPhase::Collecting)?;
        let mut added = 0;
        for descriptor in source.descriptors() {
            if self.config.disabled.iter().any(|d| d == descriptor.id()) {
                info!(plugin = %descriptor.id(), "Plugin disabled by configuration, skipped");
                continue;
            }
            if let Err(e) = self.collect_one(&descriptor) {
                return Err(self.fail(e));
            }
            added += 1;
        }
        info!(source = %source.name(), plugins = added, "Plugins collected");
        Ok(added)
    }

    fn collect_one(&mut self, descriptor: &PluginDescriptor) -> BootResult<()> {
        let plugin_id = descriptor.id().to_string();
        if self.plugins.iter().any(|p| p.record.plugin_id == plugin_id) {
            return Err(BootError::DuplicatePlugin { plugin_id });
        }

        let mut env = RegistrationEnv::new(plugin_id.clone());
        descriptor.register(&mut env);

        if env.init_calls > 1 {
            return Err(BootError::DuplicateInit { plugin_id });
        }

        let mut provides = Vec::with_capacity(env.services.len());
        for (id, value) in env.services {
            self.registry
                .register_erased(id, value, Some(plugin_id.clone()))?;
            provides.push(id);
        }

        let schema = env.init.as_ref().and_then(|init| init.schema.clone());
        debug!(
            plugin = %plugin_id,
            services = provides.len(),
            permissions = env.permissions.len(),
            "Plugin registered"
        );

        self.plugins.push(PendingPlugin {
            record: PluginRecord {
                plugin_id,
                path: descriptor.path().map(str::to_string),
                permissions: env.permissions,
                provides,
                schema,
            },
            init: env.init,
        });
        Ok(())
    }

    // ─── Boot ────────────────────────────────────────────────────────────────

    /// Orders the collected plugins, applies schemas and runs both phases.
    ///
    /// # Errors
    ///
    /// Any error is fatal: the manager moves to [`BootPhase::Failed`] and no
    /// further phase runs.  A cycle is reported before any callback or
    /// migration has run.
    pub async fn boot(&mut self, migrator: &dyn SchemaMigrator) -> BootResult<BootReport> {
        self.expect_phase(BootPhase::Collecting)?;
        match self.run_boot(migrator).await {
            Ok(report) => {
                self.transition(BootPhase::Running);
                Ok(report)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn run_boot(&mut self, migrator: &dyn SchemaMigrator) -> BootResult<BootReport> {
        self.transition(BootPhase::Ordering);
        let tiers = dependency_tiers(&self.plugins, &self.registry).map_err(|cycle| {
            BootError::CyclicDependency {
                cycle: cycle.into_iter().map(|i| self.plugin_id(i)).collect(),
            }
        })?;
        let tier_ids: Vec<Vec<String>> = tiers
            .iter()
            .map(|tier| tier.iter().map(|&i| self.plugin_id(i)).collect())
            .collect();
        for (n, ids) in tier_ids.iter().enumerate() {
            debug!(tier = n, plugins = ?ids, "Tier ordered");
        }

        for &i in tiers.iter().flatten() {
            let Some(schema) = self.plugins[i].record.schema.clone() else {
                continue;
            };
            let plugin_id = self.plugin_id(i);
            migrator
                .migrate(&plugin_id, &schema)
                .await
                .map_err(|cause| BootError::Migration {
                    plugin_id: plugin_id.clone(),
                    cause,
                })?;
            info!(plugin = %plugin_id, "Schema applied");
        }

        // ── Phase 1 ──────────────────────────────────────────────────────────
        self.transition(BootPhase::Phase1Init);
        let mut resolved: Vec<Option<Deps>> = vec![None; self.plugins.len()];

        for (n, tier) in tiers.iter().enumerate() {
            let mut tasks = Vec::with_capacity(tier.len());
            for &i in tier {
                let plugin_id = self.plugin_id(i);
                let Some(descriptor) = self.plugins[i].init.as_mut() else {
                    continue;
                };
                let Some(init) = descriptor.init.take() else {
                    continue;
                };
                let deps = Deps::resolve(&plugin_id, &descriptor.deps, &self.registry)
                    .map_err(|e| BootError::plugin_init(&plugin_id, InitPhase::Init, e.into()))?;
                resolved[i] = Some(deps.clone());
                tasks.push(run_guarded(
                    plugin_id,
                    InitPhase::Init,
                    self.config.init_timeout,
                    async move { init(deps).await },
                ));
            }
            debug!(tier = n, callbacks = tasks.len(), "Running phase-1 tier");
            future::try_join_all(tasks).await?;
        }

        // ── Phase 2 ──────────────────────────────────────────────────────────
        self.transition(BootPhase::Phase2Ready);
        let mut tasks = Vec::new();
        for &i in tiers.iter().flatten() {
            let plugin_id = self.plugin_id(i);
            let Some(descriptor) = self.plugins[i].init.as_mut() else {
                continue;
            };
            let Some(ready) = descriptor.after_plugins_ready.take() else {
                continue;
            };
            let deps = match resolved[i].take() {
                Some(deps) => deps,
                None => Deps::resolve(&plugin_id, &descriptor.deps, &self.registry)
                    .map_err(|e| BootError::plugin_init(&plugin_id, InitPhase::Ready, e.into()))?,
            };
            tasks.push(run_guarded(
                plugin_id,
                InitPhase::Ready,
                self.config.ready_timeout,
                async move { ready(deps).await },
            ));
        }
        let ready = future::try_join_all(tasks).await?;

        Ok(BootReport {
            tiers: tier_ids,
            ready,
        })
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    fn plugin_id(&self, index: usize) -> String {
        self.plugins[index].record.plugin_id.clone()
    }

    fn expect_phase(&self, expected: BootPhase) -> BootResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(BootError::InvalidPhase {
                expected,
                actual: self.phase,
            })
        }
    }

    fn transition(&mut self, phase: BootPhase) {
        self.phase = phase;
        info!(%phase, plugins = self.plugins.len(), "Boot phase entered");
    }

    fn fail(&mut self, err: BootError) -> BootError {
        self.phase = BootPhase::Failed;
        error!(error = %err, plugin = err.plugin_id().unwrap_or("-"), "Plugin boot failed");
        err
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.records().map(|r| r.plugin_id.as_str()).collect();
        f.debug_struct("PluginManager")
            .field("phase", &self.phase)
            .field("plugins", &ids)
            .field("services", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::NoopMigrator;
    use crate::plugin::StaticPluginSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    trait Marker: Send + Sync {}
    struct Unit;
    impl Marker for Unit {}

    const A_SVC: ServiceRef<dyn Marker> = ServiceRef::new("test.a");
    const B_SVC: ServiceRef<dyn Marker> = ServiceRef::new("test.b");
    const C_SVC: ServiceRef<dyn Marker> = ServiceRef::new("test.c");

    fn provider(
        id: &'static str,
        provides: ServiceRef<dyn Marker>,
        needs: &'static [ServiceRef<dyn Marker>],
    ) -> PluginDescriptor {
        PluginDescriptor::new(id, move |env| {
            env.register_service(provides, Arc::new(Unit) as Arc<dyn Marker>);
            let mut init = InitDescriptor::new().init(|_| async { Ok(()) });
            for (n, dep) in needs.iter().enumerate() {
                init = init.dep(format!("dep{n}"), *dep);
            }
            env.register_init(init);
        })
    }

    fn manager_with(plugins: Vec<PluginDescriptor>) -> PluginManager {
        let mut manager = PluginManager::new(ManagerConfig::default());
        manager.collect(&StaticPluginSource::new(plugins)).unwrap();
        manager
    }

    #[test]
    fn test_tiers_follow_dependencies() {
        let manager = manager_with(vec![
            provider("c", C_SVC, &[A_SVC, B_SVC]),
            provider("b", B_SVC, &[A_SVC]),
            provider("a", A_SVC, &[]),
        ]);
        let tiers = dependency_tiers(&manager.plugins, &manager.registry).unwrap();
        assert_eq!(tiers, vec![vec![2], vec![1], vec![0]]);
    }

    #[test]
    fn test_independent_plugins_share_a_tier() {
        let manager = manager_with(vec![
            provider("a", A_SVC, &[]),
            provider("b", B_SVC, &[]),
            provider("c", C_SVC, &[A_SVC]),
        ]);
        let tiers = dependency_tiers(&manager.plugins, &manager.registry).unwrap();
        assert_eq!(tiers, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_cycle_is_reported_in_full() {
        let manager = manager_with(vec![
            provider("a", A_SVC, &[C_SVC]),
            provider("b", B_SVC, &[A_SVC]),
            provider("c", C_SVC, &[B_SVC]),
        ]);
        let cycle = dependency_tiers(&manager.plugins, &manager.registry).unwrap_err();
        assert_eq!(cycle.len(), 4);
        assert_eq!(cycle.first(), cycle.last());
        let mut members = cycle[..3].to_vec();
        members.sort_unstable();
        assert_eq!(members, vec![0, 1, 2]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let manager = manager_with(vec![provider("a", A_SVC, &[A_SVC])]);
        let cycle = dependency_tiers(&manager.plugins, &manager.registry).unwrap_err();
        assert_eq!(cycle, vec![0, 0]);
    }

    #[test]
    fn test_duplicate_plugin_id_rejected() {
        let mut manager = PluginManager::new(ManagerConfig::default());
        let source = StaticPluginSource::new([
            PluginDescriptor::new("dup", |_| {}),
            PluginDescriptor::new("dup", |_| {}),
        ]);
        let err = manager.collect(&source).unwrap_err();
        assert!(matches!(err, BootError::DuplicatePlugin { ref plugin_id } if plugin_id == "dup"));
        assert_eq!(manager.phase(), BootPhase::Failed);
    }

    #[test]
    fn test_duplicate_init_rejected() {
        let mut manager = PluginManager::new(ManagerConfig::default());
        let source = StaticPluginSource::new([PluginDescriptor::new("twice", |env| {
            env.register_init(InitDescriptor::new());
            env.register_init(InitDescriptor::new());
        })]);
        assert!(matches!(
            manager.collect(&source),
            Err(BootError::DuplicateInit { .. })
        ));
    }

    #[test]
    fn test_disabled_plugins_are_skipped() {
        let mut manager = PluginManager::new(ManagerConfig {
            disabled: vec!["b".into()],
            ..ManagerConfig::default()
        });
        let added = manager
            .collect(&StaticPluginSource::new([
                provider("a", A_SVC, &[]),
                provider("b", B_SVC, &[]),
            ]))
            .unwrap();
        assert_eq!(added, 1);
        assert!(manager.record("b").is_none());
        assert!(!manager.registry().contains("test.b"));
    }

    #[tokio::test]
    async fn test_boot_is_single_pass() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut manager = manager_with(vec![PluginDescriptor::new("once", move |env| {
            let counter = Arc::clone(&counter);
            env.register_init(InitDescriptor::new().init(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        })]);

        assert_ok!(manager.boot(&NoopMigrator).await);
        assert_eq!(manager.phase(), BootPhase::Running);

        let again = manager.boot(&NoopMigrator).await;
        assert!(matches!(again, Err(BootError::InvalidPhase { .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
