//! Rate limit response headers

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;

use crate::limiter::RateLimitHeaders;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";
pub const RETRY_AFTER_HEADER: &str = "retry-after";
pub const RESOURCE_HEADER: &str = "x-ratelimit-resource";

/// Bucket of the REST quota every admission draws from
pub const CORE_RESOURCE: &str = "core";

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Parse `x-ratelimit-*` headers.
///
/// Needs at least `remaining` and `reset` (epoch seconds); `limit` is optional.
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> Option<RateLimitHeaders> {
    let remaining = header_u64(headers, REMAINING_HEADER)?;
    let reset = header_u64(headers, RESET_HEADER)?;
    let reset_at: DateTime<Utc> = Utc.timestamp_opt(reset as i64, 0).single()?;
    Some(RateLimitHeaders {
        limit: header_u64(headers, LIMIT_HEADER).map(|l| l as u32),
        remaining: remaining as u32,
        reset_at,
    })
}

/// Rate limit bucket a response was counted against (`core`, `search`, `graphql`, ...)
pub fn parse_rate_limit_resource(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(RESOURCE_HEADER)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_ascii_lowercase())
}

/// Whether a response's rate limit headers describe the core REST bucket.
///
/// Responses without `x-ratelimit-resource` count as core.
pub fn is_core_resource(headers: &HeaderMap) -> bool {
    parse_rate_limit_resource(headers).is_none_or(|r| r == CORE_RESOURCE)
}

/// `retry-after` in seconds, if present
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, RETRY_AFTER_HEADER).map(Duration::from_secs)
}
