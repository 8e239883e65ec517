//! Infrastructure layer: event store, order registry, fulfilment runtime.
//!
//! Domain crates stay pure; everything that does IO, spawns tasks, or keeps
//! wall-clock time lives here.

pub mod config;
pub mod event_store;
mod fulfilment;
pub mod registry;
pub mod replay;
pub mod scheduler;

#[cfg(test)]
mod integration_tests;
