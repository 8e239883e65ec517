use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{Aggregate, AggregateRoot, DomainError, OrderId, UserId};
use orderflow_events::Event;

/// Minimum length (in characters) of an item name.
pub const MIN_ITEM_NAME_CHARS: usize = 3;

/// Order status lifecycle.
///
/// The pre-creation state is implicit: an [`Order`] whose status is `None` has
/// not been created yet and that state is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    InFulfilment,
    Closed,
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            OrderStatus::Created => "created",
            OrderStatus::Paid => "paid",
            OrderStatus::InFulfilment => "in_fulfilment",
            OrderStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Aggregate root: Order.
///
/// Serde impls exist solely for snapshotting; events remain the source of
/// truth and replaying them always reproduces this state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    items: Vec<String>,
    user_id: Option<UserId>,
    status: Option<OrderStatus>,
    shipped_successfully: Option<bool>,
    version: u64,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            items: Vec::new(),
            user_id: None,
            status: None,
            shipped_successfully: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn status(&self) -> Option<OrderStatus> {
        self.status
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn is_created(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.status == Some(OrderStatus::Closed)
    }

    /// Pure projection of the current state for boundary use.
    ///
    /// Returns `None` until the order has been created.
    pub fn summary(&self) -> Option<OrderSummary> {
        let status = self.status?;
        Some(OrderSummary {
            id: self.id,
            items: self.items.clone(),
            status,
            shipped_successfully: self.shipped_successfully,
            user_id: self.user_id.unwrap_or(UserId(0)),
        })
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Stable, JSON-representable view of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: OrderId,
    pub items: Vec<String>,
    pub status: OrderStatus,
    pub shipped_successfully: Option<bool>,
    pub user_id: UserId,
}

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub items: Vec<String>,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseOrder (sent by the fulfilment process, no reply expected).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOrder {
    pub shipped_successfully: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    Create(CreateOrder),
    Pay { occurred_at: DateTime<Utc> },
    Get,
    /// Fulfilment notice (saga → aggregate); duplicates are a no-op.
    MarkInFulfilment { occurred_at: DateTime<Utc> },
    Close(CloseOrder),
}

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub items: Vec<String>,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderInFulfilment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInFulfilment {
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClosed {
    pub shipped_successfully: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    OrderPaid(OrderPaid),
    OrderInFulfilment(OrderInFulfilment),
    OrderClosed(OrderClosed),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::OrderPaid(_) => "orders.order.paid",
            OrderEvent::OrderInFulfilment(_) => "orders.order.in_fulfilment",
            OrderEvent::OrderClosed(_) => "orders.order.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::OrderPaid(e) => e.occurred_at,
            OrderEvent::OrderInFulfilment(e) => e.occurred_at,
            OrderEvent::OrderClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.items = e.items.clone();
                self.user_id = Some(e.user_id);
                self.status = Some(OrderStatus::Created);
                self.shipped_successfully = None;
            }
            OrderEvent::OrderPaid(_) => {
                self.status = Some(OrderStatus::Paid);
            }
            OrderEvent::OrderInFulfilment(_) => {
                self.status = Some(OrderStatus::InFulfilment);
            }
            OrderEvent::OrderClosed(e) => {
                self.status = Some(OrderStatus::Closed);
                self.shipped_successfully = Some(e.shipped_successfully);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Create(cmd) => self.handle_create(cmd),
            OrderCommand::Pay { occurred_at } => self.handle_pay(*occurred_at),
            OrderCommand::Get => self.handle_get(),
            OrderCommand::MarkInFulfilment { occurred_at } => {
                self.handle_mark_in_fulfilment(*occurred_at)
            }
            OrderCommand::Close(cmd) => self.handle_close(cmd),
        }
    }
}

impl Order {
    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.is_created() {
            return Err(DomainError::state_conflict(format!(
                "order {} is already created",
                self.id
            )));
        }

        if cmd.items.is_empty() {
            return Err(DomainError::validation("items must not be empty"));
        }
        for item in &cmd.items {
            if item.chars().count() < MIN_ITEM_NAME_CHARS {
                return Err(DomainError::validation(format!(
                    "item name '{item}' must be at least {MIN_ITEM_NAME_CHARS} characters"
                )));
            }
        }

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            items: cmd.items.clone(),
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_pay(&self, occurred_at: DateTime<Utc>) -> Result<Vec<OrderEvent>, DomainError> {
        match self.status {
            None => Err(DomainError::not_found()),
            Some(OrderStatus::Created) => {
                Ok(vec![OrderEvent::OrderPaid(OrderPaid { occurred_at })])
            }
            Some(status) => Err(DomainError::state_conflict(format!(
                "cannot pay an order that is in state {status}"
            ))),
        }
    }

    fn handle_get(&self) -> Result<Vec<OrderEvent>, DomainError> {
        if self.is_created() {
            Ok(vec![])
        } else {
            Err(DomainError::not_found())
        }
    }

    fn handle_mark_in_fulfilment(
        &self,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        match self.status {
            Some(OrderStatus::Paid) => Ok(vec![OrderEvent::OrderInFulfilment(OrderInFulfilment {
                occurred_at,
            })]),
            // Duplicate delivery of the fulfilment notice: explicit no-op.
            Some(OrderStatus::InFulfilment) | Some(OrderStatus::Closed) => Ok(vec![]),
            _ => Err(DomainError::state_conflict(
                "order must be paid before fulfilment can start",
            )),
        }
    }

    fn handle_close(&self, cmd: &CloseOrder) -> Result<Vec<OrderEvent>, DomainError> {
        match self.status {
            Some(OrderStatus::InFulfilment) => Ok(vec![OrderEvent::OrderClosed(OrderClosed {
                shipped_successfully: cmd.shipped_successfully,
                occurred_at: cmd.occurred_at,
            })]),
            // The shipment timer is single-shot; a duplicate close is harmless.
            Some(OrderStatus::Closed) => Ok(vec![]),
            _ => Err(DomainError::state_conflict(
                "cannot close an order that is not in fulfilment",
            )),
        }
    }
}
