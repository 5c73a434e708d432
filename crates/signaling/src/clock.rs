use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for the matchmaking core.
pub trait Clock: Send + 'static {
    /// Monotonic instant used for queue ages and session timeouts.
    fn now(&self) -> Instant;
    /// Wall-clock milliseconds since the unix epoch, used to stamp chat.
    fn epoch_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        shared::connection::now_epoch_ms()
    }
}

/// Clock that only moves when told to. Clones share the same offset.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    base_epoch_ms: u64,
    offset_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(base_epoch_ms: u64) -> Self {
        Self {
            base: Instant::now(),
            base_epoch_ms,
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    fn offset(&self) -> u64 {
        self.offset_ms.load(Ordering::SeqCst)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset())
    }

    fn epoch_ms(&self) -> u64 {
        self.base_epoch_ms + self.offset()
    }
}
