//! Append-only event streams and snapshots.
//!
//! The storage engine itself is a capability: the traits here define the
//! append/replay contract and the in-memory implementations stand in for a
//! durable backend.

mod in_memory;
mod r#trait;

pub use in_memory::{InMemoryEventStore, InMemorySnapshotStore};
pub use r#trait::{
    EventStore, EventStoreError, Snapshot, SnapshotStore, StoredEvent, UncommittedEvent,
};
