//! Entity router / registry: at most one live order instance per id.
//!
//! Every command for an order id flows through one mpsc mailbox owned by a
//! dedicated task, which gives the aggregate its single-writer guarantee
//! without explicit locks. Instances are created lazily by replaying the
//! persisted stream, evicted when idle, and recreated on next use; the event
//! log is durable so eviction never loses state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use orderflow_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, OrderId};
use orderflow_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use orderflow_orders::order::{Order, OrderCommand, OrderEvent, OrderStatus, OrderSummary};

use crate::config::OrderflowConfig;
use crate::event_store::{
    EventStore, EventStoreError, Snapshot, SnapshotStore, UncommittedEvent,
};
use crate::fulfilment;
use crate::replay::apply_history;
use crate::scheduler::{OutcomeSource, Scheduler};

/// Stream type for order events.
pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";
/// Stream type for shipment events (owned by the fulfilment process).
pub const FULFILMENT_AGGREGATE_TYPE: &str = "fulfilment.shipment";

const MAILBOX_CAPACITY: usize = 64;

/// Failure executing a command against an order instance.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The event log rejected a write; the order instance stops and is
    /// rebuilt by replay on next use.
    #[error("event store failure: {0}")]
    Store(#[from] EventStoreError),
}

/// Failure asking an order instance for a reply.
#[derive(Debug, Error)]
pub enum AskError {
    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("order instance stopped before replying")]
    Delivery,

    #[error(transparent)]
    Command(#[from] CommandError),
}

pub(crate) struct RuntimeDeps {
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) snapshots: Arc<dyn SnapshotStore>,
    pub(crate) bus: InMemoryEventBus<EventEnvelope<JsonValue>>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) outcomes: Arc<dyn OutcomeSource>,
    pub(crate) config: OrderflowConfig,
}

struct MailboxEnvelope {
    command: OrderCommand,
    reply: Option<oneshot::Sender<Result<OrderSummary, CommandError>>>,
}

struct Inner {
    deps: RuntimeDeps,
    mailboxes: Mutex<HashMap<OrderId, mpsc::Sender<MailboxEnvelope>>>,
}

/// Routes commands to the single live instance per order id.
#[derive(Clone)]
pub struct OrderRegistry {
    inner: Arc<Inner>,
}

impl OrderRegistry {
    pub fn new(
        store: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        scheduler: Arc<dyn Scheduler>,
        outcomes: Arc<dyn OutcomeSource>,
        config: OrderflowConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps: RuntimeDeps {
                    store,
                    snapshots,
                    bus: InMemoryEventBus::new(),
                    scheduler,
                    outcomes,
                    config,
                },
                mailboxes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn deps(&self) -> &RuntimeDeps {
        &self.inner.deps
    }

    /// Observe committed events as they are published.
    pub fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.inner.deps.bus.subscribe()
    }

    /// Deliver a command and wait for the reply, bounded by `ask-timeout`.
    pub async fn ask(
        &self,
        order_id: OrderId,
        command: OrderCommand,
    ) -> Result<OrderSummary, AskError> {
        let ask_timeout = self.inner.deps.config.ask_timeout;

        // Two attempts: the mailbox may close between lookup and send when an
        // idle instance evicts itself.
        for _ in 0..2 {
            let tx = self.mailbox(order_id);
            let (reply_tx, reply_rx) = oneshot::channel();
            let envelope = MailboxEnvelope {
                command: command.clone(),
                reply: Some(reply_tx),
            };

            if tx.send(envelope).await.is_err() {
                continue;
            }

            return match tokio::time::timeout(ask_timeout, reply_rx).await {
                Err(_) => Err(AskError::Timeout),
                Ok(Err(_)) => Err(AskError::Delivery),
                Ok(Ok(result)) => result.map_err(AskError::from),
            };
        }

        Err(AskError::Delivery)
    }

    /// Deliver a command with no reply expected (saga → aggregate notices).
    pub async fn tell(&self, order_id: OrderId, command: OrderCommand) {
        for _ in 0..2 {
            let tx = self.mailbox(order_id);
            let envelope = MailboxEnvelope {
                command: command.clone(),
                reply: None,
            };
            if tx.send(envelope).await.is_ok() {
                return;
            }
        }
        warn!(%order_id, ?command, "dropping notice, order mailbox unavailable");
    }

    /// Locate the live mailbox for an order, spawning its instance if needed.
    fn mailbox(&self, order_id: OrderId) -> mpsc::Sender<MailboxEnvelope> {
        let mut mailboxes = self
            .inner
            .mailboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(tx) = mailboxes.get(&order_id) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        mailboxes.insert(order_id, tx.clone());

        let registry = self.clone();
        let runner_tx = tx.clone();
        tokio::spawn(async move {
            run_order_instance(registry, order_id, runner_tx, rx).await;
        });

        tx
    }

    /// Remove the mailbox entry, but only if it still belongs to `tx` (a
    /// replacement instance may already have registered itself).
    fn forget_mailbox(&self, order_id: OrderId, tx: &mpsc::Sender<MailboxEnvelope>) {
        let mut mailboxes = self
            .inner
            .mailboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(current) = mailboxes.get(&order_id) {
            if current.same_channel(tx) {
                mailboxes.remove(&order_id);
            }
        }
    }
}

/// Rebuild an order from snapshot + event suffix.
fn recover_order(deps: &RuntimeDeps, order_id: OrderId) -> Result<Order, EventStoreError> {
    let mut order = match deps.snapshots.load(ORDER_AGGREGATE_TYPE, order_id)? {
        Some(snapshot) => serde_json::from_value(snapshot.state)
            .map_err(|e| EventStoreError::Deserialize(e.to_string()))?,
        None => Order::empty(order_id),
    };

    let history = deps.store.load_stream(ORDER_AGGREGATE_TYPE, order_id)?;
    apply_history(&mut order, &history)?;
    Ok(order)
}

/// The single-writer loop for one order instance.
///
/// Commands are processed strictly sequentially; persistence of one command's
/// event completes before the next command is examined.
async fn run_order_instance(
    registry: OrderRegistry,
    order_id: OrderId,
    tx: mpsc::Sender<MailboxEnvelope>,
    mut rx: mpsc::Receiver<MailboxEnvelope>,
) {
    let mut order = match recover_order(registry.deps(), order_id) {
        Ok(order) => order,
        Err(e) => {
            error!(%order_id, error = %e, "order recovery failed");
            registry.forget_mailbox(order_id, &tx);
            return;
        }
    };

    if order.version() > 0 {
        debug!(%order_id, version = order.version(), "order recovered from log");
    }

    // A paid-but-not-closed order had a shipment in flight when the previous
    // instance went away; restart the fulfilment process. It re-reads its own
    // stream and resumes from whatever it had recorded.
    if matches!(
        order.status(),
        Some(OrderStatus::Paid) | Some(OrderStatus::InFulfilment)
    ) {
        if let Some(summary) = order.summary() {
            info!(%order_id, "re-arming pending shipment after recovery");
            tokio::spawn(fulfilment::run(registry.clone(), summary));
        }
    }

    let idle_evict = registry.deps().config.idle_evict;

    loop {
        match tokio::time::timeout(idle_evict, rx.recv()).await {
            // Idle: evict this instance. Close the mailbox first and drain
            // anything that raced in, so no accepted command is lost.
            Err(_) => {
                registry.forget_mailbox(order_id, &tx);
                rx.close();
                while let Some(envelope) = rx.recv().await {
                    if handle_envelope(&registry, &mut order, order_id, envelope)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                debug!(%order_id, "order instance evicted after idle period");
                return;
            }
            // Registry dropped; nothing more will arrive.
            Ok(None) => return,
            Ok(Some(envelope)) => {
                if handle_envelope(&registry, &mut order, order_id, envelope)
                    .await
                    .is_err()
                {
                    // Persistence failed: crash-and-recover. Drop in-memory
                    // state; the next command triggers a fresh replay.
                    registry.forget_mailbox(order_id, &tx);
                    return;
                }
            }
        }
    }
}

/// Process one command end to end. `Err` means the instance must stop.
async fn handle_envelope(
    registry: &OrderRegistry,
    order: &mut Order,
    order_id: OrderId,
    envelope: MailboxEnvelope,
) -> Result<(), ()> {
    let deps = registry.deps();
    let MailboxEnvelope { command, reply } = envelope;

    let decided = match order.handle(&command) {
        Ok(events) => events,
        Err(e) => {
            debug!(%order_id, ?command, error = %e, "command rejected");
            if let Some(reply) = reply {
                let _ = reply.send(Err(CommandError::Domain(e)));
            }
            return Ok(());
        }
    };

    if decided.is_empty() {
        // Get, or an idempotent duplicate notice.
        if let Some(reply) = reply {
            let _ = reply.send(summary_reply(order));
        }
        return Ok(());
    }

    let expected = ExpectedVersion::Exact(order.version());
    let uncommitted: Result<Vec<_>, _> = decided
        .iter()
        .map(|ev| {
            UncommittedEvent::from_typed(order_id, ORDER_AGGREGATE_TYPE, Uuid::now_v7(), ev)
        })
        .collect();

    let committed = match uncommitted.and_then(|events| deps.store.append(events, expected)) {
        Ok(committed) => committed,
        Err(e) => {
            error!(%order_id, error = %e, "event append failed, stopping order instance");
            if let Some(reply) = reply {
                let _ = reply.send(Err(CommandError::Store(e)));
            }
            return Err(());
        }
    };

    for (event, stored) in decided.iter().zip(&committed) {
        order.apply(event);
        if deps.bus.publish(stored.to_envelope()).is_err() {
            warn!(%order_id, "event publication failed after append");
        }
    }

    for event in &decided {
        match event {
            OrderEvent::OrderPaid(_) => {
                info!(%order_id, "order paid, starting fulfilment");
                if let Some(summary) = order.summary() {
                    tokio::spawn(fulfilment::run(registry.clone(), summary));
                }
            }
            OrderEvent::OrderClosed(e) => {
                info!(%order_id, shipped_successfully = e.shipped_successfully, "order closed");
                save_snapshot(deps, order);
            }
            OrderEvent::OrderCreated(_) => {
                info!(%order_id, "order created");
            }
            OrderEvent::OrderInFulfilment(_) => {
                info!(%order_id, "order in fulfilment");
            }
        }
    }

    if let Some(reply) = reply {
        let _ = reply.send(summary_reply(order));
    }

    Ok(())
}

fn summary_reply(order: &Order) -> Result<OrderSummary, CommandError> {
    order
        .summary()
        .ok_or_else(|| CommandError::Domain(DomainError::not_found()))
}

/// Snapshot on closure so recovery does not replay the full history.
/// Best-effort: a failed snapshot only means a longer replay later.
fn save_snapshot(deps: &RuntimeDeps, order: &Order) {
    let state = match serde_json::to_value(order) {
        Ok(state) => state,
        Err(e) => {
            warn!(order_id = %order.id_typed(), error = %e, "snapshot serialization failed");
            return;
        }
    };

    let snapshot = Snapshot {
        aggregate_id: order.id_typed(),
        aggregate_type: ORDER_AGGREGATE_TYPE.to_string(),
        version: order.version(),
        state,
        taken_at: Utc::now(),
    };

    if let Err(e) = deps.snapshots.save(snapshot) {
        warn!(order_id = %order.id_typed(), error = %e, "snapshot save failed");
    }
}
