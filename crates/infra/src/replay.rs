//! Deterministic stream replay helpers.

use serde::de::DeserializeOwned;

use orderflow_core::Aggregate;

use crate::event_store::{EventStoreError, StoredEvent};

/// Validate that a loaded stream is well-formed before replaying it.
///
/// Defense in depth: even if a buggy backend returns a corrupted stream, the
/// aggregate never sees out-of-order or foreign events.
pub fn validate_stream(
    aggregate_id: orderflow_core::OrderId,
    stream: &[StoredEvent],
) -> Result<(), EventStoreError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            ));
        }
        if e.sequence_number <= last {
            return Err(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

/// Fold a stream suffix into an aggregate.
///
/// Events at or below the aggregate's current version are skipped, so the
/// same helper serves both full replay (from an empty aggregate) and
/// snapshot-plus-suffix recovery. Replay is deterministic: repeating it from
/// the same starting point always produces identical state.
pub fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), EventStoreError>
where
    A: Aggregate<Id = orderflow_core::OrderId>,
    A::Event: DeserializeOwned,
{
    validate_stream(*aggregate.id(), history)?;

    for stored in history {
        if stored.sequence_number <= aggregate.version() {
            continue;
        }
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| EventStoreError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
