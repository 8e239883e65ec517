//! Fulfilment process runtime.
//!
//! One instance runs per paid order. It records its own facts in a shipment
//! stream, notifies the order aggregate that shipping started, waits out the
//! shipping delay, draws the outcome and reports it back exactly once in
//! effect: every step is persisted before its side effect, so a restarted
//! process resumes from whatever it had recorded instead of repeating
//! completed work.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use orderflow_core::{Aggregate, AggregateRoot, ExpectedVersion, OrderId};
use orderflow_orders::fulfilment::{Shipment, ShipmentCommand, ShipmentEvent};
use orderflow_orders::order::{CloseOrder, OrderCommand, OrderSummary};

use crate::event_store::{EventStoreError, UncommittedEvent};
use crate::registry::{OrderRegistry, FULFILMENT_AGGREGATE_TYPE};
use crate::replay::apply_history;

pub(crate) async fn run(registry: OrderRegistry, summary: OrderSummary) {
    let order_id = summary.id;

    let mut shipment = match recover_shipment(&registry, order_id) {
        Ok(shipment) => shipment,
        Err(e) => {
            warn!(%order_id, error = %e, "shipment recovery failed, fulfilment aborted");
            return;
        }
    };

    // A previous run already completed the shipment but the order never
    // closed (crash between the two). Only the close notice is resent.
    if shipment.is_completed() {
        match recorded_outcome(&registry, order_id) {
            Ok(Some(successful)) => {
                debug!(%order_id, successful, "shipment already completed, resending close");
                close_order(&registry, order_id, successful).await;
            }
            Ok(None) => {
                warn!(%order_id, "completed shipment has no recorded outcome");
            }
            Err(e) => {
                warn!(%order_id, error = %e, "could not read recorded shipment outcome");
            }
        }
        return;
    }

    if !shipment.is_started() {
        match persist(&registry, &mut shipment, ShipmentCommand::Start {
            occurred_at: Utc::now(),
        }) {
            Ok(()) => {
                info!(%order_id, items = ?summary.items, "started shipping of items");
            }
            Err(EventStoreError::Concurrency(_)) => {
                // Another fulfilment instance beat us to this shipment.
                debug!(%order_id, "shipment already claimed by another instance");
                return;
            }
            Err(e) => {
                warn!(%order_id, error = %e, "could not record shipment start");
                return;
            }
        }
    } else {
        info!(%order_id, "resuming pending shipment");
    }

    // The notice may arrive more than once across restarts; the aggregate
    // treats duplicates as a no-op.
    registry
        .tell(order_id, OrderCommand::MarkInFulfilment {
            occurred_at: Utc::now(),
        })
        .await;

    let deps = registry.deps();
    deps.scheduler.after(deps.config.shipping_delay).await;

    let successful = deps.outcomes.draw();
    match persist(&registry, &mut shipment, ShipmentCommand::Complete {
        successful,
        occurred_at: Utc::now(),
    }) {
        Ok(()) => {
            info!(%order_id, successful, "shipment completed");
        }
        Err(EventStoreError::Concurrency(_)) => {
            debug!(%order_id, "shipment completed by another instance");
            return;
        }
        Err(e) => {
            warn!(%order_id, error = %e, "could not record shipment completion");
            return;
        }
    }

    close_order(&registry, order_id, successful).await;
}

async fn close_order(registry: &OrderRegistry, order_id: OrderId, shipped_successfully: bool) {
    registry
        .tell(
            order_id,
            OrderCommand::Close(CloseOrder {
                shipped_successfully,
                occurred_at: Utc::now(),
            }),
        )
        .await;
}

fn recover_shipment(
    registry: &OrderRegistry,
    order_id: OrderId,
) -> Result<Shipment, EventStoreError> {
    let mut shipment = Shipment::empty(order_id);
    let history = registry
        .deps()
        .store
        .load_stream(FULFILMENT_AGGREGATE_TYPE, order_id)?;
    apply_history(&mut shipment, &history)?;
    Ok(shipment)
}

/// Read back the outcome a completed shipment recorded.
fn recorded_outcome(
    registry: &OrderRegistry,
    order_id: OrderId,
) -> Result<Option<bool>, EventStoreError> {
    let history = registry
        .deps()
        .store
        .load_stream(FULFILMENT_AGGREGATE_TYPE, order_id)?;

    for stored in &history {
        let ev: ShipmentEvent = serde_json::from_value(stored.payload.clone())
            .map_err(|e| EventStoreError::Deserialize(e.to_string()))?;
        if let ShipmentEvent::ShipmentEnded { successful, .. } = ev {
            return Ok(Some(successful));
        }
    }
    Ok(None)
}

/// Decide, append, reduce. The expected-version check doubles as a mutual
/// exclusion guard between concurrently recovered fulfilment instances.
fn persist(
    registry: &OrderRegistry,
    shipment: &mut Shipment,
    command: ShipmentCommand,
) -> Result<(), EventStoreError> {
    let order_id = *shipment.id();
    let events = shipment
        .handle(&command)
        .map_err(|e| EventStoreError::InvalidAppend(e.to_string()))?;

    if events.is_empty() {
        return Ok(());
    }

    let uncommitted: Result<Vec<_>, _> = events
        .iter()
        .map(|ev| {
            UncommittedEvent::from_typed(order_id, FULFILMENT_AGGREGATE_TYPE, Uuid::now_v7(), ev)
        })
        .collect();

    registry
        .deps()
        .store
        .append(uncommitted?, ExpectedVersion::Exact(shipment.version()))?;

    for ev in &events {
        shipment.apply(ev);
    }
    Ok(())
}
