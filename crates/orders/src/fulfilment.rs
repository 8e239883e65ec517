//! Shipment record owned by the fulfilment process.
//!
//! One shipment exists per order, alive only for the payment-to-closure
//! window. Its events are persisted to a stream of their own so a restarted
//! process can tell whether a shipment was pending when it went down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{Aggregate, AggregateRoot, DomainError, OrderId};
use orderflow_events::Event;

/// Shipment state for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    order_id: OrderId,
    started: bool,
    completed: bool,
    version: u64,
}

impl Shipment {
    pub fn empty(order_id: OrderId) -> Self {
        Self {
            order_id,
            started: false,
            completed: false,
            version: 0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// A shipment that was started but never completed is pending; recovery
    /// uses this to decide whether to re-arm the delay.
    pub fn is_pending(&self) -> bool {
        self.started && !self.completed
    }
}

impl AggregateRoot for Shipment {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.order_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    Start {
        occurred_at: DateTime<Utc>,
    },
    /// Fired by the single-shot shipping timer; the outcome is drawn by the
    /// runtime and carried here as data.
    Complete {
        successful: bool,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentEvent {
    ShipmentStarted {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    ShipmentEnded {
        successful: bool,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::ShipmentStarted { .. } => "fulfilment.shipment.started",
            ShipmentEvent::ShipmentEnded { .. } => "fulfilment.shipment.ended",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShipmentEvent::ShipmentStarted { occurred_at, .. } => *occurred_at,
            ShipmentEvent::ShipmentEnded { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Shipment {
    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ShipmentEvent::ShipmentStarted { order_id, .. } => {
                self.order_id = *order_id;
                self.started = true;
            }
            ShipmentEvent::ShipmentEnded { .. } => {
                self.completed = true;
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShipmentCommand::Start { occurred_at } => {
                if self.started {
                    // At-least-once start is fine; the facts are already recorded.
                    return Ok(vec![]);
                }
                Ok(vec![ShipmentEvent::ShipmentStarted {
                    order_id: self.order_id,
                    occurred_at: *occurred_at,
                }])
            }
            ShipmentCommand::Complete {
                successful,
                occurred_at,
            } => {
                if !self.started {
                    return Err(DomainError::state_conflict(
                        "cannot complete a shipment that was never started",
                    ));
                }
                if self.completed {
                    return Err(DomainError::state_conflict("shipment already completed"));
                }
                Ok(vec![ShipmentEvent::ShipmentEnded {
                    successful: *successful,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}
