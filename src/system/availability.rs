use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Tracks whether an external resource (mixer, lircd socket) is usable and
/// when the next reconnect attempt is allowed after a failure.
#[derive(Debug)]
pub struct RetryableAvailability {
    available: AtomicBool,
    retry_after_ms: AtomicU64,
    backoff: Duration,
}

impl RetryableAvailability {
    pub fn new(initially_available: bool, backoff: Duration) -> Self {
        Self {
            available: AtomicBool::new(initially_available),
            retry_after_ms: AtomicU64::new(0),
            backoff,
        }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Returns `true` when the caller may use (or retry) the resource.
    pub fn try_acquire(&self) -> bool {
        if self.available.load(Ordering::Relaxed) {
            return true;
        }
        now_ms() >= self.retry_after_ms.load(Ordering::Relaxed)
    }

    /// Returns `true` if this call flipped the state from unavailable.
    pub fn mark_available(&self) -> bool {
        let was_available = self.available.swap(true, Ordering::Relaxed);
        self.retry_after_ms.store(0, Ordering::Relaxed);
        !was_available
    }

    /// Returns `true` if this call flipped the state from available.
    pub fn mark_unavailable(&self) -> bool {
        let was_available = self.available.swap(false, Ordering::Relaxed);
        let backoff_ms = u64::try_from(self.backoff.as_millis()).unwrap_or(u64::MAX);
        let retry_at = now_ms().saturating_add(backoff_ms);
        self.retry_after_ms.store(retry_at, Ordering::Relaxed);
        was_available
    }
}

fn now_ms() -> u64 {
    u64::try_from(EPOCH.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_blocks_until_backoff_elapses() {
        let availability = RetryableAvailability::new(true, Duration::from_secs(60));
        assert!(availability.try_acquire());

        assert!(availability.mark_unavailable());
        assert!(!availability.try_acquire());

        // second failure is not a transition
        assert!(!availability.mark_unavailable());
    }

    #[test]
    fn zero_backoff_allows_immediate_retry() {
        let availability = RetryableAvailability::new(true, Duration::ZERO);
        availability.mark_unavailable();
        assert!(availability.try_acquire());
        assert!(availability.mark_available());
        assert!(!availability.mark_available());
    }
}
