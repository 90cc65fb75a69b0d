use crate::{
    bucket::RateBucket,
    error::{Error, Result},
    global::GlobalLimiter,
    headers::ParsedHeaders,
};
use dashmap::DashMap;
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// How many times a request may be retried after a 429 before giving up.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 5;
/// How many times a request may be retried after a 5xx before giving up.
pub const MAX_SERVER_ERROR_RETRIES: u32 = 5;

/// Converts `X-RateLimit-Reset`'s absolute Unix epoch seconds into a
/// duration from now, since [`RateBucket`] tracks its reset as a monotonic
/// [`tokio::time::Instant`] rather than wall-clock time.
fn duration_until_unix_time(target_unix_seconds: f64) -> Duration {
    let now_unix_seconds =
        SystemTime::now().duration_since(UNIX_EPOCH).map(|duration| duration.as_secs_f64()).unwrap_or(0.0);
    Duration::from_secs_f64((target_unix_seconds - now_unix_seconds).max(0.0))
}

/// A minimal view of an HTTP response that [`RateLimiter::execute`] needs:
/// its status code and its headers. Implemented by whatever HTTP client the
/// caller uses (kept generic so this crate has no transport dependency).
pub trait RatelimitedResponse {
    fn status_code(&self) -> u16;

    /// Header name/value pairs, in whatever order the transport yields them.
    fn header_pairs(&self) -> Vec<(String, Vec<u8>)>;
}

/// Per-route bucket state plus the global request cap.
///
/// Cloning a `RateLimiter` is cheap and shares the same underlying buckets
/// (it is an `Arc` internally).
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    buckets: DashMap<String, Arc<RateBucket>>,
    /// Route string -> server-supplied bucket id, memoized for the process
    /// lifetime once Discord tells us a route's real bucket.
    route_aliases: DashMap<String, String>,
    global: GlobalLimiter,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                buckets: DashMap::new(),
                route_aliases: DashMap::new(),
                global: GlobalLimiter::default(),
            }),
        }
    }

    fn key_for(&self, route: &str) -> String {
        self.inner.route_aliases.get(route).map(|entry| entry.value().clone()).unwrap_or_else(|| route.to_owned())
    }

    fn bucket_for(&self, key: &str) -> Arc<RateBucket> {
        Arc::clone(&*self.inner.buckets.entry(key.to_owned()).or_insert_with(|| Arc::new(RateBucket::new())))
    }

    /// Blocks until both the global cap and the route's bucket have room,
    /// then takes a slot from each. A pre-emptive-wait event is emitted if
    /// either blocked.
    pub async fn acquire(&self, route: &str) -> bool {
        let global_waited = self.inner.global.acquire().await;

        let key = self.key_for(route);
        let bucket = self.bucket_for(&key);
        let bucket_waited = bucket.acquire().await;

        let waited = global_waited || bucket_waited;
        if waited {
            tracing::debug!(route, "pre-emptive wait for rate limit bucket");
        }

        waited
    }

    /// Apply the `X-RateLimit-*` headers from a response to the bucket for
    /// `route`, aliasing the route to the server-supplied bucket id if one
    /// was present and differs from what we already have on file.
    pub async fn update_from_response(&self, route: &str, headers: &ParsedHeaders) {
        if let Some(bucket_id) = &headers.bucket {
            if self.key_for(route) != *bucket_id {
                self.inner.route_aliases.insert(route.to_owned(), bucket_id.clone());
            }
        }

        if !headers.has_bucket_info() {
            return;
        }

        let key = self.key_for(route);
        let bucket = self.bucket_for(&key);
        let reset_after = duration_until_unix_time(headers.reset.unwrap_or(0.0));

        bucket.update(headers.limit.unwrap_or(u64::MAX), headers.remaining.unwrap_or(0), reset_after, headers.global).await;
    }

    /// Record a 429 for `route`: drain its bucket and set its reset time to
    /// `retry_after` from now.
    pub async fn handle_429(&self, route: &str, retry_after: Duration) {
        let key = self.key_for(route);
        let bucket = self.bucket_for(&key);
        bucket.handle_429(retry_after).await;
    }

    /// Run `make_request` under the full retry policy (§4.1): acquire a
    /// slot, send, then retry on 429 (sleeping `Retry-After`) or 5xx
    /// (exponential backoff), up to 5 attempts each. Any other status is
    /// returned to the caller unchanged.
    pub async fn execute<T, E, F, Fut>(&self, route: &str, mut make_request: F) -> Result<T>
    where
        T: RatelimitedResponse,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut rate_limit_attempts = 0u32;
        let mut server_error_attempts = 0u32;

        loop {
            self.acquire(route).await;

            let response = make_request().await.map_err(Error::transport)?;

            let header_pairs = response.header_pairs();
            let borrowed: Vec<(&str, &[u8])> =
                header_pairs.iter().map(|(name, value)| (name.as_str(), value.as_slice())).collect();
            let headers = ParsedHeaders::from_pairs(borrowed);
            self.update_from_response(route, &headers).await;

            match response.status_code() {
                429 => {
                    rate_limit_attempts += 1;
                    if rate_limit_attempts > MAX_RATE_LIMIT_RETRIES {
                        return Err(Error::rate_limit_exhausted(route));
                    }

                    let retry_after = Duration::from_secs_f64(headers.retry_after.unwrap_or(1.0).max(0.0));
                    self.handle_429(route, retry_after).await;
                    tracing::warn!(route, attempt = rate_limit_attempts, "rate limited, retrying");
                    tokio::time::sleep(retry_after).await;
                }
                500..=599 => {
                    server_error_attempts += 1;
                    if server_error_attempts > MAX_SERVER_ERROR_RETRIES {
                        return Ok(response);
                    }

                    let backoff = Duration::from_secs(1u64 << (server_error_attempts - 1).min(4));
                    tracing::warn!(route, attempt = server_error_attempts, "server error, backing off");
                    tokio::time::sleep(backoff).await;
                }
                _ => return Ok(response),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct FakeResponse {
        status: u16,
        headers: Vec<(String, Vec<u8>)>,
    }

    impl RatelimitedResponse for FakeResponse {
        fn status_code(&self) -> u16 {
            self.status
        }

        fn header_pairs(&self) -> Vec<(String, Vec<u8>)> {
            self.headers.clone()
        }
    }

    #[tokio::test]
    async fn global_cap_allows_fifty_immediately_then_blocks() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for _ in 0..50 {
            limiter.acquire("/foo").await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));

        limiter.acquire("/foo").await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(700));
        assert!(elapsed <= Duration::from_millis(1300));
    }

    #[tokio::test]
    async fn aliasing_route_to_server_bucket_shares_state() {
        let limiter = RateLimiter::new();
        let reset_at = std::time::SystemTime::now() + Duration::from_millis(50);
        let headers = ParsedHeaders {
            bucket: Some("abc".into()),
            limit: Some(1),
            remaining: Some(0),
            reset: Some(reset_at.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs_f64()),
            global: false,
            retry_after: None,
        };

        limiter.update_from_response("/channels/1/messages", &headers).await;

        let started = Instant::now();
        limiter.acquire("/channels/1/messages").await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn a_429_blocks_the_next_acquire_for_retry_after() {
        let limiter = RateLimiter::new();
        limiter.handle_429("/foo", Duration::from_millis(500)).await;

        let started = Instant::now();
        limiter.acquire("/foo").await;
        assert!(started.elapsed() >= Duration::from_millis(450));
    }

    #[tokio::test]
    async fn execute_retries_on_429_and_returns_eventual_success() {
        let limiter = RateLimiter::new();
        let mut attempts = 0u32;

        let result: Result<FakeResponse> = limiter
            .execute("/foo", || {
                attempts += 1;
                let status = if attempts < 2 { 429 } else { 200 };
                async move {
                    Ok::<_, std::io::Error>(FakeResponse {
                        status,
                        headers: vec![("retry-after".to_owned(), b"0.01".to_vec())],
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap().status_code(), 200);
        assert_eq!(attempts, 2);
    }
}
