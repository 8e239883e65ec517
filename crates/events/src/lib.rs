//! `orderflow-events` — event contracts and distribution mechanics.
//!
//! Events are the source of truth: they are stored first (event store), then
//! distributed (event bus) to any interested consumer.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
