//! Property-based test generators using proptest.
//!
//! Provides strategies for payloads, algorithm ids and entry batches that
//! keep raft's index invariants.

use proptest::prelude::*;
use raftseal_storage::{Entry, EntryType};

/// Strategy for arbitrary payloads, including empty ones.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for custom algorithm wire ids (never `0` or `1`).
pub fn custom_algorithm_strategy() -> impl Strategy<Value = u32> {
    2u32..=u32::MAX
}

/// Strategy for a batch of entries with consecutive indexes from 1.
pub fn entry_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::vec((payload_strategy(), any::<bool>()), 1..=max_len).prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (data, conf))| Entry {
                term: 1,
                index: i as u64 + 1,
                entry_type: if conf {
                    EntryType::ConfChange
                } else {
                    EntryType::Normal
                },
                data,
            })
            .collect()
    })
}
