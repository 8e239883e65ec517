//! End-to-end tests of the registry + fulfilment runtime over in-memory
//! stores, with deterministic time and outcomes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use orderflow_core::{DomainError, ExpectedVersion, OrderId, UserId};
use orderflow_orders::fulfilment::ShipmentEvent;
use orderflow_orders::order::{
    CreateOrder, OrderCommand, OrderEvent, OrderInFulfilment, OrderPaid, OrderStatus, OrderSummary,
};

use crate::config::OrderflowConfig;
use crate::event_store::{
    EventStore, EventStoreError, InMemoryEventStore, InMemorySnapshotStore, SnapshotStore,
    StoredEvent, UncommittedEvent,
};
use crate::registry::{
    AskError, CommandError, OrderRegistry, FULFILMENT_AGGREGATE_TYPE, ORDER_AGGREGATE_TYPE,
};
use crate::scheduler::{FixedOutcome, NoDelay};

struct Harness {
    registry: OrderRegistry,
    store: Arc<InMemoryEventStore>,
    snapshots: Arc<InMemorySnapshotStore>,
}

fn harness(outcome: bool, config: OrderflowConfig) -> Harness {
    let store = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let registry = OrderRegistry::new(
        store.clone(),
        snapshots.clone(),
        Arc::new(NoDelay),
        Arc::new(FixedOutcome(outcome)),
        config,
    );
    Harness {
        registry,
        store,
        snapshots,
    }
}

fn test_config() -> OrderflowConfig {
    OrderflowConfig {
        ask_timeout: Duration::from_secs(1),
        ..OrderflowConfig::default()
    }
}

fn create_cmd(items: &[&str]) -> OrderCommand {
    OrderCommand::Create(CreateOrder {
        items: items.iter().map(|s| s.to_string()).collect(),
        user_id: UserId(42),
        occurred_at: Utc::now(),
    })
}

fn pay_cmd() -> OrderCommand {
    OrderCommand::Pay {
        occurred_at: Utc::now(),
    }
}

async fn wait_for_closed(registry: &OrderRegistry, id: OrderId) -> OrderSummary {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Ok(summary) = registry.ask(id, OrderCommand::Get).await {
            if summary.status == OrderStatus::Closed {
                return summary;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "order {id} never closed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn event_types(stream: &[StoredEvent]) -> Vec<&str> {
    stream.iter().map(|e| e.event_type.as_str()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn create_then_get_round_trip() {
    let h = harness(true, test_config());
    let id = OrderId::new();

    let created = h
        .registry
        .ask(id, create_cmd(&["Asus GTX 2060"]))
        .await
        .unwrap();
    assert_eq!(created.status, OrderStatus::Created);

    let fetched = h.registry.ask(id, OrderCommand::Get).await.unwrap();
    assert_eq!(fetched.items, vec!["Asus GTX 2060".to_string()]);
    assert_eq!(fetched.user_id, UserId(42));
    assert_eq!(fetched.shipped_successfully, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn get_unknown_order_is_not_found() {
    let h = harness(true, test_config());

    let err = h
        .registry
        .ask(OrderId::new(), OrderCommand::Get)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AskError::Command(CommandError::Domain(DomainError::NotFound))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn create_rejects_invalid_items() {
    let h = harness(true, test_config());

    let err = h
        .registry
        .ask(OrderId::new(), create_cmd(&[]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AskError::Command(CommandError::Domain(DomainError::Validation(_)))
    ));

    let id = OrderId::new();
    let err = h.registry.ask(id, create_cmd(&["ab"])).await.unwrap_err();
    assert!(matches!(
        err,
        AskError::Command(CommandError::Domain(DomainError::Validation(_)))
    ));

    // Rejections leave no trace in the log.
    assert!(h.store.load_stream(ORDER_AGGREGATE_TYPE, id).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn paying_twice_records_a_single_payment() {
    let h = harness(true, test_config());
    let id = OrderId::new();

    h.registry.ask(id, create_cmd(&["some GPU"])).await.unwrap();
    h.registry.ask(id, pay_cmd()).await.unwrap();

    let err = h.registry.ask(id, pay_cmd()).await.unwrap_err();
    assert!(matches!(
        err,
        AskError::Command(CommandError::Domain(DomainError::StateConflict(_)))
    ));

    let stream = h.store.load_stream(ORDER_AGGREGATE_TYPE, id).unwrap();
    let paid = stream
        .iter()
        .filter(|e| e.event_type == "orders.order.paid")
        .count();
    assert_eq!(paid, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn full_lifecycle_closes_with_successful_shipment() {
    let h = harness(true, test_config());
    let id = OrderId::new();

    h.registry
        .ask(id, create_cmd(&["Asus GTX 2060"]))
        .await
        .unwrap();
    h.registry.ask(id, pay_cmd()).await.unwrap();

    let closed = wait_for_closed(&h.registry, id).await;
    assert_eq!(closed.shipped_successfully, Some(true));

    let stream = h.store.load_stream(ORDER_AGGREGATE_TYPE, id).unwrap();
    assert_eq!(
        event_types(&stream),
        vec![
            "orders.order.created",
            "orders.order.paid",
            "orders.order.in_fulfilment",
            "orders.order.closed",
        ]
    );

    let shipments = h.store.load_stream(FULFILMENT_AGGREGATE_TYPE, id).unwrap();
    assert_eq!(
        event_types(&shipments),
        vec!["fulfilment.shipment.started", "fulfilment.shipment.ended"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_shipment_closes_the_order_too() {
    let h = harness(false, test_config());
    let id = OrderId::new();

    h.registry.ask(id, create_cmd(&["some GPU"])).await.unwrap();
    h.registry.ask(id, pay_cmd()).await.unwrap();

    let closed = wait_for_closed(&h.registry, id).await;
    assert_eq!(closed.shipped_successfully, Some(false));
    assert_eq!(closed.status, OrderStatus::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_takes_a_snapshot() {
    let h = harness(true, test_config());
    let id = OrderId::new();

    h.registry.ask(id, create_cmd(&["some GPU"])).await.unwrap();
    h.registry.ask(id, pay_cmd()).await.unwrap();
    wait_for_closed(&h.registry, id).await;

    let snap = h
        .snapshots
        .load(ORDER_AGGREGATE_TYPE, id)
        .unwrap()
        .expect("snapshot should exist after closure");
    assert_eq!(snap.version, 4);
    assert_eq!(snap.state["status"], "closed");
}

#[tokio::test(flavor = "multi_thread")]
async fn evicted_order_is_recovered_by_replay() {
    let config = OrderflowConfig {
        ask_timeout: Duration::from_secs(1),
        idle_evict: Duration::from_millis(50),
        ..OrderflowConfig::default()
    };
    let h = harness(true, config);
    let id = OrderId::new();

    h.registry
        .ask(id, create_cmd(&["Asus GTX 2060"]))
        .await
        .unwrap();

    // Let the instance time out and evict itself.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fetched = h.registry.ask(id, OrderCommand::Get).await.unwrap();
    assert_eq!(fetched.items, vec!["Asus GTX 2060".to_string()]);
    assert_eq!(fetched.status, OrderStatus::Created);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_commands_serialize_on_one_instance() {
    let h = harness(true, test_config());
    let id = OrderId::new();

    h.registry.ask(id, create_cmd(&["some GPU"])).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = h.registry.clone();
        tasks.push(tokio::spawn(
            async move { registry.ask(id, pay_cmd()).await },
        ));
    }
    for _ in 0..8 {
        let registry = h.registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.ask(id, OrderCommand::Get).await
        }));
    }
    for task in tasks {
        let _ = task.await.unwrap();
    }

    // Interleaving never produces a duplicate payment.
    let stream = h.store.load_stream(ORDER_AGGREGATE_TYPE, id).unwrap();
    let paid = stream
        .iter()
        .filter(|e| e.event_type == "orders.order.paid")
        .count();
    assert_eq!(paid, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_shipment_is_rearmed_on_recovery() {
    let h = harness(true, test_config());
    let id = OrderId::new();

    // A previous process recorded the shipment start, then crashed before
    // the delay elapsed.
    seed_order_events(
        &*h.store,
        id,
        &[
            OrderEvent::OrderCreated(orderflow_orders::order::OrderCreated {
                items: vec!["some GPU".to_string()],
                user_id: UserId(42),
                occurred_at: Utc::now(),
            }),
            OrderEvent::OrderPaid(OrderPaid {
                occurred_at: Utc::now(),
            }),
        ],
    );
    seed_shipment_events(
        &*h.store,
        id,
        &[ShipmentEvent::ShipmentStarted {
            order_id: id,
            occurred_at: Utc::now(),
        }],
    );

    // First contact rehydrates the order and re-arms the pending shipment,
    // which resumes from the recorded start.
    let fetched = h.registry.ask(id, OrderCommand::Get).await.unwrap();
    assert_eq!(fetched.status, OrderStatus::Paid);

    let closed = wait_for_closed(&h.registry, id).await;
    assert_eq!(closed.shipped_successfully, Some(true));

    // The resumed run completed the original shipment, it did not start a
    // second one.
    let shipments = h.store.load_stream(FULFILMENT_AGGREGATE_TYPE, id).unwrap();
    assert_eq!(
        event_types(&shipments),
        vec!["fulfilment.shipment.started", "fulfilment.shipment.ended"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn committed_events_are_published_to_subscribers() {
    let h = harness(true, test_config());
    let subscription = h.registry.subscribe();
    let id = OrderId::new();

    h.registry.ask(id, create_cmd(&["some GPU"])).await.unwrap();

    let envelope = subscription
        .recv_timeout(Duration::from_secs(1))
        .expect("append should be followed by publication");
    assert_eq!(envelope.event_type(), "orders.order.created");
    assert_eq!(envelope.aggregate_id(), id);
    assert_eq!(envelope.sequence_number(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_append_times_out_the_ask() {
    let store = Arc::new(SlowStore {
        inner: Arc::new(InMemoryEventStore::new()),
        delay: Duration::from_millis(500),
    });
    let registry = OrderRegistry::new(
        store,
        Arc::new(InMemorySnapshotStore::new()),
        Arc::new(NoDelay),
        Arc::new(FixedOutcome(true)),
        OrderflowConfig {
            ask_timeout: Duration::from_millis(50),
            ..OrderflowConfig::default()
        },
    );

    let err = registry
        .ask(OrderId::new(), create_cmd(&["some GPU"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AskError::Timeout));
}

struct SlowStore {
    inner: Arc<InMemoryEventStore>,
    delay: Duration,
}

impl EventStore for SlowStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        std::thread::sleep(self.delay);
        self.inner.append(events, expected_version)
    }

    fn load_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: OrderId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(aggregate_type, aggregate_id)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn ended_shipment_without_closure_is_repaired_on_recovery() {
    let h = harness(true, test_config());
    let id = OrderId::new();

    // A previous process recorded the full shipment but crashed before the
    // close notice reached the order.
    seed_order_events(
        &*h.store,
        id,
        &[
            OrderEvent::OrderCreated(orderflow_orders::order::OrderCreated {
                items: vec!["some GPU".to_string()],
                user_id: UserId(42),
                occurred_at: Utc::now(),
            }),
            OrderEvent::OrderPaid(OrderPaid {
                occurred_at: Utc::now(),
            }),
            OrderEvent::OrderInFulfilment(OrderInFulfilment {
                occurred_at: Utc::now(),
            }),
        ],
    );
    seed_shipment_events(
        &*h.store,
        id,
        &[
            ShipmentEvent::ShipmentStarted {
                order_id: id,
                occurred_at: Utc::now(),
            },
            ShipmentEvent::ShipmentEnded {
                successful: true,
                occurred_at: Utc::now(),
            },
        ],
    );

    // First contact rehydrates the order and re-arms fulfilment, which finds
    // the completed shipment and resends only the close notice.
    let fetched = h.registry.ask(id, OrderCommand::Get).await.unwrap();
    assert_eq!(fetched.status, OrderStatus::InFulfilment);

    let closed = wait_for_closed(&h.registry, id).await;
    assert_eq!(closed.shipped_successfully, Some(true));

    // No second shipment was run.
    let shipments = h.store.load_stream(FULFILMENT_AGGREGATE_TYPE, id).unwrap();
    assert_eq!(shipments.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn append_failure_stops_and_recovers_the_instance() {
    let inner = Arc::new(InMemoryEventStore::new());
    let failing = Arc::new(FailingStore {
        inner: inner.clone(),
        fail: AtomicBool::new(false),
    });
    let registry = OrderRegistry::new(
        failing.clone(),
        Arc::new(InMemorySnapshotStore::new()),
        Arc::new(NoDelay),
        Arc::new(FixedOutcome(true)),
        test_config(),
    );
    let id = OrderId::new();

    registry.ask(id, create_cmd(&["some GPU"])).await.unwrap();

    failing.fail.store(true, Ordering::SeqCst);
    let err = registry.ask(id, pay_cmd()).await.unwrap_err();
    assert!(matches!(err, AskError::Command(CommandError::Store(_))));

    // The instance stopped; once the store heals, replay rebuilds it and the
    // command succeeds.
    failing.fail.store(false, Ordering::SeqCst);
    let paid = registry.ask(id, pay_cmd()).await.unwrap();
    assert!(matches!(
        paid.status,
        OrderStatus::Paid | OrderStatus::InFulfilment | OrderStatus::Closed
    ));
}

struct FailingStore {
    inner: Arc<InMemoryEventStore>,
    fail: AtomicBool,
}

impl EventStore for FailingStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EventStoreError::InvalidAppend("injected failure".into()));
        }
        self.inner.append(events, expected_version)
    }

    fn load_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: OrderId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(aggregate_type, aggregate_id)
    }
}

fn seed_order_events(store: &dyn EventStore, id: OrderId, events: &[OrderEvent]) {
    let uncommitted = events
        .iter()
        .map(|ev| UncommittedEvent::from_typed(id, ORDER_AGGREGATE_TYPE, Uuid::now_v7(), ev))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    store.append(uncommitted, ExpectedVersion::Exact(0)).unwrap();
}

fn seed_shipment_events(store: &dyn EventStore, id: OrderId, events: &[ShipmentEvent]) {
    let uncommitted = events
        .iter()
        .map(|ev| UncommittedEvent::from_typed(id, FULFILMENT_AGGREGATE_TYPE, Uuid::now_v7(), ev))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    store.append(uncommitted, ExpectedVersion::Exact(0)).unwrap();
}
