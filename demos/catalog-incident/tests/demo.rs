use catalog_incident::incident::INCIDENTS;
use catalog_incident::{exit_status, plugin_source, walkthrough};
use tokio_test::assert_ok;
use trellis::core::ServiceError;
use trellis::framework::{BootError, InitFailure, InitPhase, NoopMigrator};
use trellis::runtime::{RuntimeBuilder, RuntimeError, TrellisRuntime};

fn builder() -> RuntimeBuilder {
    TrellisRuntime::builder()
        .without_env()
        .search_path("/nonexistent/catalog-incident-tests")
        .logging(false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_catalog_boots_before_its_consumers() {
    let mut runtime = builder().build().await.unwrap();
    let report = runtime
        .boot(&plugin_source(true), &NoopMigrator)
        .await
        .unwrap();

    assert_eq!(
        report.tiers,
        [vec!["search".to_string()], vec!["catalog".into()], vec!["incident".into()]]
    );
    assert_eq!(report.ready, ["search", "catalog"]);

    let catalog = runtime.manager().record("catalog").unwrap();
    assert_eq!(catalog.provides, ["catalog.db"]);
    assert_eq!(catalog.permissions.len(), 2);
    assert!(catalog.schema.is_some());

    assert_ok!(runtime.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_walkthrough_opens_incidents_and_reindexes_once() {
    let mut runtime = builder().build().await.unwrap();
    assert_ok!(runtime.boot(&plugin_source(true), &NoopMigrator).await);

    let summary = walkthrough(&runtime).await.unwrap();

    let mut degraded: Vec<_> = summary.incidents.iter().map(|i| i.entity.as_str()).collect();
    degraded.sort_unstable();
    assert_eq!(degraded, ["checkout", "ledger"]);
    assert!(summary.incidents.iter().all(|i| i.owner == "team-payments"));
    assert_eq!(summary.rebuilds, 1);

    let providers: Vec<_> = summary.hits.iter().map(|h| h.provider.as_str()).collect();
    assert_eq!(providers, ["catalog", "catalog", "incident", "incident"]);

    let log = runtime.manager().get(INCIDENTS).unwrap();
    assert_eq!(log.snapshot().len(), 2);

    assert_ok!(runtime.shutdown().await);
}

#[tokio::test]
async fn test_boot_without_catalog_fails_on_incident() {
    let mut runtime = builder().build().await.unwrap();
    let err = runtime
        .boot(&plugin_source(false), &NoopMigrator)
        .await
        .unwrap_err();

    assert_eq!(err.plugin_id(), Some("incident"));
    assert_eq!(err.exit_status(), 70);
    match err {
        RuntimeError::Boot(BootError::PluginInit {
            phase: InitPhase::Init,
            cause: InitFailure::MissingService(ServiceError::NotFound { id }),
            ..
        }) => assert_eq!(id, "catalog.db"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(runtime.bus().is_shut_down());
}

#[test]
fn test_failed_walkthrough_exits_non_zero() {
    assert_eq!(exit_status(false, &Ok(())), 0);
    assert_eq!(exit_status(true, &Ok(())), 1);
    assert_eq!(exit_status(true, &Err(RuntimeError::NotBooted)), 70);
}
