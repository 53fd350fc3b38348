use std::sync::Arc;

use trellis_core::ServiceRef;
use trellis_framework::{
    LinkedPluginSource, ManagerConfig, NoopMigrator, PluginManager, PluginSource,
    RegistrationEnv,
};

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

struct Hello;

impl Greeter for Hello {
    fn greet(&self) -> String {
        "hello".into()
    }
}

const GREETER: ServiceRef<dyn Greeter> = ServiceRef::new("linked.greeter");

#[trellis_macros::plugin("linked.greeter")]
fn register_greeter(env: &mut RegistrationEnv) {
    env.register_service(GREETER, Arc::new(Hello) as Arc<dyn Greeter>);
}

#[trellis_macros::plugin("linked.audience")]
fn register_audience(_env: &mut RegistrationEnv) {}

#[test]
fn test_linked_source_sees_annotated_plugins() {
    let descriptors = LinkedPluginSource.descriptors();
    let ids: Vec<&str> = descriptors.iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec!["linked.audience", "linked.greeter"]);
    assert!(
        descriptors
            .iter()
            .all(|d| d.path().is_some_and(|p| p.ends_with("linked")))
    );
}

#[tokio::test]
async fn test_linked_plugins_boot() {
    let mut manager = PluginManager::new(ManagerConfig::default());
    assert_eq!(manager.collect(&LinkedPluginSource).unwrap(), 2);
    manager.boot(&NoopMigrator).await.unwrap();
    assert_eq!(manager.get(GREETER).unwrap().greet(), "hello");
}
