use std::sync::Arc;

use orderflow_infra::config::OrderflowConfig;
use orderflow_infra::event_store::{InMemoryEventStore, InMemorySnapshotStore};
use orderflow_infra::registry::OrderRegistry;
use orderflow_infra::scheduler::{OutcomeSource, RandomOutcome, Scheduler, TokioScheduler};

/// Shared service handles for the HTTP layer.
pub struct AppServices {
    pub registry: OrderRegistry,
}

/// Wire the default (in-memory) service stack.
pub fn build_services(config: OrderflowConfig) -> AppServices {
    build_services_with(
        config,
        Arc::new(TokioScheduler),
        Arc::new(RandomOutcome),
    )
}

/// Wiring with injectable time and randomness, for deterministic tests.
pub fn build_services_with(
    config: OrderflowConfig,
    scheduler: Arc<dyn Scheduler>,
    outcomes: Arc<dyn OutcomeSource>,
) -> AppServices {
    let store = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let registry = OrderRegistry::new(store, snapshots, scheduler, outcomes, config);

    AppServices { registry }
}
