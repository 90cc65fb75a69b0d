//! Parsing of Discord's `X-RateLimit-*` and `Retry-After` response headers.
//!
//! Headers are consumed as an iterator of `(name, value)` byte-string pairs
//! rather than any particular HTTP client's header map type, so this crate
//! stays usable from any transport.

use std::str;

/// The headers relevant to rate limiting, parsed out of one HTTP response.
/// Every field is optional because a response may carry none, some, or all
/// of them (e.g. a 204 from a route with no bucket has none; a 429 has at
/// least `retry-after`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedHeaders {
    pub bucket: Option<String>,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Unix epoch seconds at which the bucket resets, as given by
    /// `X-RateLimit-Reset` (floating point, since Discord may send
    /// fractional seconds).
    pub reset: Option<f64>,
    pub global: bool,
    /// Seconds to wait before retrying, from `Retry-After`. Only present on
    /// 429 responses.
    pub retry_after: Option<f64>,
}

impl ParsedHeaders {
    /// Parse from an iterator of header name/value pairs. Names are matched
    /// case-insensitively; values that fail to parse as their expected type
    /// are silently ignored (a malformed optional header should not fail the
    /// whole response).
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        let mut parsed = Self::default();

        for (name, value) in pairs {
            let Ok(value) = str::from_utf8(value) else { continue };

            match name.to_ascii_lowercase().as_str() {
                "x-ratelimit-bucket" => parsed.bucket = Some(value.to_owned()),
                "x-ratelimit-limit" => parsed.limit = value.parse().ok(),
                "x-ratelimit-remaining" => parsed.remaining = value.parse().ok(),
                "x-ratelimit-reset" => parsed.reset = value.parse().ok(),
                "x-ratelimit-global" => parsed.global = value.eq_ignore_ascii_case("true"),
                "retry-after" => parsed.retry_after = value.parse().ok(),
                _ => {}
            }
        }

        parsed
    }

    /// Whether any bucket information (limit/remaining/reset) is present.
    pub const fn has_bucket_info(&self) -> bool {
        self.limit.is_some() && self.remaining.is_some() && self.reset.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_bucket_response() {
        let pairs: Vec<(&str, &[u8])> = vec![
            ("X-RateLimit-Bucket", b"abcd1234"),
            ("X-RateLimit-Limit", b"10"),
            ("X-RateLimit-Remaining", b"9"),
            ("X-RateLimit-Reset", b"1700000002.5"),
        ];
        let headers = ParsedHeaders::from_pairs(pairs);

        assert_eq!(headers.bucket.as_deref(), Some("abcd1234"));
        assert_eq!(headers.limit, Some(10));
        assert_eq!(headers.remaining, Some(9));
        assert_eq!(headers.reset, Some(1700000002.5));
        assert!(!headers.global);
        assert!(headers.has_bucket_info());
    }

    #[test]
    fn parses_a_429_with_fractional_retry_after() {
        let pairs: Vec<(&str, &[u8])> = vec![
            ("Retry-After", b"0.5"),
            ("X-RateLimit-Bucket", b"abc"),
            ("X-RateLimit-Global", b"false"),
        ];
        let headers = ParsedHeaders::from_pairs(pairs);

        assert_eq!(headers.retry_after, Some(0.5));
        assert!(!headers.global);
        assert!(!headers.has_bucket_info());
    }

    #[test]
    fn ignores_unparseable_values() {
        let pairs: Vec<(&str, &[u8])> = vec![("X-RateLimit-Limit", b"not-a-number")];
        let headers = ParsedHeaders::from_pairs(pairs);
        assert_eq!(headers.limit, None);
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let pairs: Vec<(&str, &[u8])> = vec![("x-ratelimit-remaining", b"3")];
        let headers = ParsedHeaders::from_pairs(pairs);
        assert_eq!(headers.remaining, Some(3));
    }
}
