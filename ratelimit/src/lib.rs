//! A token-bucket REST rate limiter for Discord's API (§4.1): per-route
//! buckets driven by server-supplied headers, a global 50 req/s cap, and a
//! retry policy for 429/5xx responses.

mod bucket;
mod error;
mod global;
mod headers;
mod limiter;

pub use error::{Error, ErrorType, Result};
pub use headers::ParsedHeaders;
pub use limiter::{RateLimiter, RatelimitedResponse, MAX_RATE_LIMIT_RETRIES, MAX_SERVER_ERROR_RETRIES};

#[cfg(test)]
mod static_assertions_tests {
    use super::RateLimiter;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RateLimiter: Clone, Send, Sync, std::fmt::Debug);
}
