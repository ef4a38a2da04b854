//! Rate-limit metadata carried on HTTP responses.
//!
//! Discord reports limits with `x-ratelimit-*` headers, the MTG API uses the
//! IETF draft `ratelimit-*` names, and 429 responses may add `retry-after`
//! or a JSON body with `retry_after`. [`RateLimitInfo`] folds all of them
//! into one shape the governor can act on.

use std::time::Duration;

use http::HeaderMap;
use serde::Deserialize;
use tracing::warn;

/// Longest delay taken from a response. The governor applies its own,
/// smaller cap on top.
pub const MAX_REPORTED_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Rate-limit metadata extracted from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    /// Calls allowed per window, if reported.
    pub limit: Option<u32>,
    /// Calls left in the current window, if reported.
    pub remaining: Option<u32>,
    /// Time until the window resets.
    pub reset_after: Option<Duration>,
    /// Explicit wait requested by a 429.
    pub retry_after: Option<Duration>,
    /// Bucket id the server assigned to this route.
    pub bucket: Option<String>,
    /// The limit applies to every route, not just this one.
    pub global: bool,
}

/// JSON body Discord sends with a 429.
#[derive(Debug, Deserialize)]
struct RateLimitedBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let limit = header_str(headers, "x-ratelimit-limit")
            .or_else(|| header_str(headers, "ratelimit-limit"))
            .and_then(|s| s.trim().parse::<u32>().ok());

        let remaining = header_str(headers, "x-ratelimit-remaining")
            .or_else(|| header_str(headers, "ratelimit-remaining"))
            .and_then(|s| s.trim().parse::<u32>().ok());

        let reset_after = header_str(headers, "x-ratelimit-reset-after")
            .or_else(|| header_str(headers, "ratelimit-reset"))
            .and_then(parse_seconds)
            .or_else(|| header_str(headers, "x-ratelimit-reset").and_then(parse_epoch_reset));

        let retry_after = header_str(headers, "retry-after").and_then(parse_retry_after);

        let bucket = header_str(headers, "x-ratelimit-bucket").map(str::to_string);

        let global = header_str(headers, "x-ratelimit-global")
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
            || header_str(headers, "x-ratelimit-scope")
                .map(|s| s.eq_ignore_ascii_case("global"))
                .unwrap_or(false);

        Self {
            limit,
            remaining,
            reset_after,
            retry_after,
            bucket,
            global,
        }
    }

    /// Fill gaps from a 429 JSON body. Non-JSON bodies are ignored.
    pub fn merge_body(&mut self, body: &[u8]) {
        let Ok(parsed) = serde_json::from_slice::<RateLimitedBody>(body) else {
            return;
        };
        if self.retry_after.is_none() {
            self.retry_after = parsed.retry_after.and_then(seconds);
        }
        self.global |= parsed.global;
    }

    /// How long a rejected request should wait, if the server said.
    pub fn delay(&self) -> Option<Duration> {
        self.retry_after.or(self.reset_after)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Server-reported seconds, clamped to [`MAX_REPORTED_DELAY`]. NaN and
/// negative values are ignored.
fn seconds(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs.min(MAX_REPORTED_DELAY.as_secs_f64())))
}

/// Fractional seconds, e.g. `1.25`.
fn parse_seconds(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().and_then(seconds)
}

/// Unix epoch seconds at which the window resets.
fn parse_epoch_reset(value: &str) -> Option<Duration> {
    let reset_at = value.trim().parse::<f64>().ok().filter(|v| !v.is_nan())?;
    let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    seconds((reset_at - now).max(0.0))
}

/// `Retry-After` is either delta-seconds or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Some(delay) = parse_seconds(value) {
        return Some(delay);
    }

    match chrono::DateTime::parse_from_rfc2822(value.trim()) {
        Ok(date) => {
            let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
            Some(wait.to_std().unwrap_or(Duration::ZERO).min(MAX_REPORTED_DELAY))
        }
        Err(_) => {
            warn!(value, "unparseable retry-after header");
            None
        }
    }
}
