use std::sync::atomic::{AtomicU64, Ordering};
use tokio::{
    sync::Mutex,
    time::{sleep_until, Duration, Instant},
};

#[derive(Debug)]
struct BucketState {
    limit: u64,
    remaining: u64,
    reset_at: Option<Instant>,
    /// Whether the last response carrying bucket headers also set
    /// `X-RateLimit-Global` (§3 Data Model).
    is_global: bool,
}

impl Default for BucketState {
    fn default() -> Self {
        // A freshly-seen bucket has no server-supplied limits yet; treat it
        // as effectively unbounded until the first response headers arrive,
        // mirroring the teacher's `Bucket::new`.
        Self { limit: u64::MAX, remaining: u64::MAX, reset_at: None, is_global: false }
    }
}

/// Per-route (or per-server-bucket, once aliased) rate limit window.
///
/// `remaining` never goes negative: [`RateBucket::acquire`] blocks instead
/// of ever decrementing past zero.
#[derive(Debug, Default)]
pub struct RateBucket {
    state: Mutex<BucketState>,
    total_requests: AtomicU64,
    total_preemptive_waits: AtomicU64,
    total_429s: AtomicU64,
}

impl RateBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until a slot is available, then takes it. Returns `true` if
    /// the caller had to wait (used to emit a pre-emptive-wait event).
    pub async fn acquire(&self) -> bool {
        let mut waited = false;

        loop {
            let wait_until = {
                let mut state = self.state.lock().await;

                if state.remaining > 0 {
                    state.remaining -= 1;
                    None
                } else if let Some(reset_at) = state.reset_at {
                    if Instant::now() >= reset_at {
                        state.remaining = state.limit.saturating_sub(1);
                        state.reset_at = None;
                        None
                    } else {
                        Some(reset_at)
                    }
                } else {
                    // Remaining hit zero with no known reset time; don't
                    // deadlock the caller, just let the next response's
                    // headers correct the window.
                    None
                }
            };

            match wait_until {
                None => break,
                Some(reset_at) => {
                    waited = true;
                    self.total_preemptive_waits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("waiting for bucket to reset");
                    sleep_until(reset_at).await;
                }
            }
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        waited
    }

    /// Apply fresh `limit`/`remaining`/`reset_after`/`is_global` from a
    /// response's headers.
    pub async fn update(&self, limit: u64, remaining: u64, reset_after: Duration, is_global: bool) {
        let mut state = self.state.lock().await;
        state.limit = limit;
        state.remaining = remaining;
        state.reset_at = Some(Instant::now() + reset_after);
        state.is_global = is_global;
    }

    /// Apply a 429's `Retry-After`: the bucket is fully drained until that
    /// many seconds from now.
    pub async fn handle_429(&self, retry_after: Duration) {
        let mut state = self.state.lock().await;
        state.remaining = 0;
        state.reset_at = Some(Instant::now() + retry_after);
        self.total_429s.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn limit(&self) -> u64 {
        self.state.lock().await.limit
    }

    pub async fn remaining(&self) -> u64 {
        self.state.lock().await.remaining
    }

    pub async fn is_global(&self) -> bool {
        self.state.lock().await.is_global
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_preemptive_waits(&self) -> u64 {
        self.total_preemptive_waits.load(Ordering::Relaxed)
    }

    pub fn total_429s(&self) -> u64 {
        self.total_429s.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn fresh_bucket_never_blocks() {
        let bucket = RateBucket::new();
        for _ in 0..1000 {
            assert!(!bucket.acquire().await);
        }
    }

    #[tokio::test]
    async fn exhausted_bucket_blocks_until_reset() {
        let bucket = RateBucket::new();
        bucket.update(1, 0, StdDuration::from_millis(50), false).await;

        let started = std::time::Instant::now();
        let waited = bucket.acquire().await;
        assert!(waited);
        assert!(started.elapsed() >= StdDuration::from_millis(45));
    }

    #[tokio::test]
    async fn handle_429_drains_remaining_and_counts() {
        let bucket = RateBucket::new();
        bucket.update(5, 5, StdDuration::from_secs(10), false).await;
        bucket.handle_429(StdDuration::from_millis(10)).await;

        assert_eq!(bucket.remaining().await, 0);
        assert_eq!(bucket.total_429s(), 1);
    }

    #[tokio::test]
    async fn update_records_the_global_flag() {
        let bucket = RateBucket::new();
        assert!(!bucket.is_global().await);

        bucket.update(5, 5, StdDuration::from_secs(10), true).await;
        assert!(bucket.is_global().await);
    }
}
