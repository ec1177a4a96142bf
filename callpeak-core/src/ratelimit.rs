//! Rate-limit header parsing and wait derivation.
//!
//! Two header families are understood:
//! - `inin-ratelimit-allowed` / `-count` / `-remaining` / `-reset`
//! - `x-ratelimit-limit` / `-remaining` / `-reset`
//!
//! A reset value larger than `now + 120s` is an absolute epoch timestamp,
//! anything smaller is relative seconds-to-reset.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::models::RateLimitSnapshot;

/// Reset values beyond `now + this` are treated as epoch seconds.
const ABSOLUTE_RESET_THRESHOLD_SECS: i64 = 120;

/// Floor for any derived wait.
const MIN_WAIT_SECS: u64 = 1;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name)?.parse().ok()
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    let raw = header_str(headers, name)?;
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|v| v.ceil() as i64))
}

impl RateLimitSnapshot {
    /// Build a snapshot from whichever header family is present. The
    /// `inin-ratelimit-*` family wins when both are sent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let allowed = header_u64(headers, "inin-ratelimit-allowed");
        let count = header_u64(headers, "inin-ratelimit-count");
        let inin_remaining = header_u64(headers, "inin-ratelimit-remaining");
        let inin_reset = header_i64(headers, "inin-ratelimit-reset");

        if allowed.is_some() || count.is_some() || inin_remaining.is_some() || inin_reset.is_some() {
            let remaining = inin_remaining.or_else(|| match (allowed, count) {
                (Some(a), Some(c)) => Some(a.saturating_sub(c)),
                _ => None,
            });
            return Self {
                limit: allowed,
                remaining,
                reset: inin_reset,
            };
        }

        Self {
            limit: header_u64(headers, "x-ratelimit-limit"),
            remaining: header_u64(headers, "x-ratelimit-remaining"),
            reset: header_i64(headers, "x-ratelimit-reset"),
        }
    }

    /// Seconds until reset, applying the absolute-vs-relative heuristic.
    pub fn reset_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset = self.reset?;
        let now_epoch = now.timestamp();
        let secs = if reset > now_epoch + ABSOLUTE_RESET_THRESHOLD_SECS {
            reset - now_epoch
        } else {
            reset
        };
        Some(Duration::from_secs((secs.max(0) as u64).max(MIN_WAIT_SECS)))
    }
}

/// `Retry-After` as seconds or an HTTP-date, converted to a wait from `now`.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = header_str(headers, "retry-after")?;

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds.max(MIN_WAIT_SECS)));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let secs = retry_at.signed_duration_since(now).num_seconds();
    Some(Duration::from_secs((secs.max(0) as u64).max(MIN_WAIT_SECS)))
}

/// Wait before retrying a 429: `Retry-After`, then the vendor reset headers,
/// then `default_wait`.
pub fn rate_limit_wait(headers: &HeaderMap, now: DateTime<Utc>, default_wait: Duration) -> Duration {
    if let Some(wait) = parse_retry_after(headers, now) {
        return wait;
    }
    let inin = header_i64(headers, "inin-ratelimit-reset");
    let generic = header_i64(headers, "x-ratelimit-reset");
    if let Some(reset) = inin.or(generic) {
        let snapshot = RateLimitSnapshot {
            reset: Some(reset),
            ..Default::default()
        };
        if let Some(wait) = snapshot.reset_in(now) {
            return wait;
        }
    }
    default_wait
}
