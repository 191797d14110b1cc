//! Deterministic `IdGenerator` for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use keel_core::id::IdGenerator;

/// Hands out `start`, `start + 1`, `start + 2`, ...
#[derive(Debug)]
pub struct SequenceIdGenerator {
    next: AtomicU64,
}

impl SequenceIdGenerator {
    /// Create a generator whose first id is `start`.
    #[must_use]
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
