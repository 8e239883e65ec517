//! `orderflow-orders` — the order lifecycle domain.
//!
//! Two pure state machines live here:
//! - [`Order`]: the aggregate enforcing the purchase-order lifecycle
//!   (created → paid → in fulfilment → closed).
//! - [`Shipment`]: the fulfilment process's own record (started → ended),
//!   owned by the fulfilment runtime in `orderflow-infra`.
//!
//! Neither performs IO; orchestration lives in infrastructure.

pub mod fulfilment;
pub mod order;

pub use fulfilment::{Shipment, ShipmentCommand, ShipmentEvent};
pub use order::{
    CloseOrder, CreateOrder, Order, OrderCommand, OrderEvent, OrderStatus, OrderSummary,
};
