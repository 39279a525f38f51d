//! Cooperative cancellation flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of [`SignalLatch::sleep`]
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// One-way flag shared between the interrupt handler and the stream loops
///
/// Once tripped it stays set for the lifetime of the latch.
#[derive(Clone, Default)]
pub struct SignalLatch {
    tripped: Arc<AtomicBool>,
}

impl SignalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch; returns true only for the call that actually set it
    pub fn trip(&self) -> bool {
        !self.tripped.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Sleep for `duration`, waking early if the latch trips
    ///
    /// Returns true if the latch is set on return.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
