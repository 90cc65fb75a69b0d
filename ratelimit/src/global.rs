use leaky_bucket_lite::LeakyBucket;
use tokio::time::Duration;

/// The global 50 request/second cap shared by every route.
///
/// Implemented with `leaky-bucket-lite`, the same tokio-flavored token
/// bucket crate the teacher gateway already depends on for its own internal
/// command ratelimiting, rather than hand-rolling a second one.
#[derive(Debug)]
pub struct GlobalLimiter {
    bucket: LeakyBucket,
}

impl GlobalLimiter {
    /// `requests_per_second` is the rolling-window cap; Discord's documented
    /// value is 50.
    pub fn new(requests_per_second: u32) -> Self {
        let amount = f64::from(requests_per_second);

        let bucket = LeakyBucket::builder()
            .max(amount)
            .tokens(amount)
            .refill_interval(Duration::from_secs(1))
            .refill_amount(amount)
            .build();

        Self { bucket }
    }

    /// Blocks until the current 1-second window has room for one more
    /// request, then takes a slot. Returns `true` if the caller had to wait.
    pub async fn acquire(&self) -> bool {
        if tokio::time::timeout(Duration::ZERO, self.bucket.acquire_one()).await.is_ok() {
            return false;
        }

        self.bucket.acquire_one().await;
        true
    }
}

impl Default for GlobalLimiter {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn immediate_acquire_does_not_report_waiting() {
        let limiter = GlobalLimiter::new(2);
        assert!(!limiter.acquire().await);
        assert!(!limiter.acquire().await);
    }

    #[tokio::test]
    async fn an_exhausted_window_reports_waiting() {
        let limiter = GlobalLimiter::new(1);
        assert!(!limiter.acquire().await);
        assert!(limiter.acquire().await);
    }
}
