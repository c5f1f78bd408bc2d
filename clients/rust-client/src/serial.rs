//! Request id allocation.

use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic request id counter shared by every caller of a connection.
///
/// Ids start at 1. Wrapping past `u32::MAX` is not handled: the counter
/// silently rolls over to 0.
#[derive(Debug, Default)]
pub struct Serial {
    counter: AtomicU32,
}

impl Serial {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    /// Hand out the next id.
    pub fn next_id(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Last id handed out, 0 if none.
    pub fn current(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Restart numbering. Only call while no request is in flight.
    pub fn reset(&self) {
        self.counter.store(0, Ordering::Release);
    }
}
