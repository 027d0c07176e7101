//! Per-service backoff after rate limiting.
//!
//! A 429 from a service pushes back the next call to that service; the failed
//! call itself is not retried. Remaining-request headers are honoured the same
//! way when a service reports an exhausted quota.

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound of the exponential backoff.
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Backoff state of one service.
#[derive(Debug, Default)]
pub struct ServiceState {
    /// Consecutive 429 responses
    pub consecutive_429s: u32,
    /// No call before this instant
    pub backoff_until: Option<Instant>,
    /// Remaining requests reported by the service
    pub remaining_requests: Option<u32>,
    /// When the reported request quota resets
    pub reset_requests_at: Option<Instant>,
}

impl ServiceState {
    /// Time to wait before the next call.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut wait = Duration::ZERO;

        if let Some(until) = self.backoff_until.filter(|&t| t > now) {
            wait = wait.max(until - now);
        }
        if self.remaining_requests == Some(0) {
            if let Some(reset) = self.reset_requests_at.filter(|&t| t > now) {
                wait = wait.max(reset - now);
            }
        }
        wait
    }

    /// Record a 429. `retry_after` from the response wins over the exponential step.
    pub fn record_429(&mut self, retry_after: Option<Duration>) {
        self.consecutive_429s += 1;
        let exponential = 2.0_f64.powi(self.consecutive_429s as i32).min(MAX_BACKOFF_SECS);
        let backoff = retry_after.unwrap_or_else(|| Duration::from_secs_f64(exponential));
        self.backoff_until = Some(Instant::now() + backoff);
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs = backoff.as_secs_f64(),
            "Rate limited (429), delaying next call"
        );
    }

    pub fn record_success(&mut self) {
        self.consecutive_429s = 0;
        self.backoff_until = None;
    }

    pub fn update_from_headers(&mut self, headers: &HeaderMap) {
        let header = |key: &str| headers.get(key)?.to_str().ok().map(str::to_string);

        if let Some(s) = header("x-ratelimit-remaining-requests") {
            self.remaining_requests = s.parse().ok();
        }
        if let Some(secs) = header("x-ratelimit-reset-requests").and_then(|s| s.parse::<f64>().ok())
        {
            self.reset_requests_at = Some(Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
        }
    }
}

/// Backoff table shared by the clients of one run.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: DashMap<String, ServiceState>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep out any pending backoff for `service`. Returns the time waited.
    pub async fn wait_if_needed(&self, service: &str) -> Duration {
        // Guard dropped before sleeping.
        let wait = self
            .states
            .get(service)
            .map(|state| state.wait_time())
            .unwrap_or(Duration::ZERO);

        if !wait.is_zero() {
            debug!(service, wait_ms = wait.as_millis() as u64, "Waiting out backoff");
            self.total_wait_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Record the status and headers of a response from `service`.
    pub fn record_response(&self, service: &str, status: u16, headers: &HeaderMap) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut state = self.states.entry(service.to_string()).or_default();
        state.update_from_headers(headers);

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429(retry_after(headers));
        } else if status < 400 {
            state.record_success();
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_429s: self.total_429s.load(Ordering::Relaxed),
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            services_tracked: self.states.len(),
        }
    }
}

/// `retry-after` in seconds, if present.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
    pub services_tracked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_429_sets_backoff_and_success_clears_it() {
        let limiter = RateLimiter::new();
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));

        limiter.record_response("llm", 429, &headers);
        let wait = limiter.states.get("llm").unwrap().wait_time();
        assert!(wait > Duration::from_secs(25) && wait <= Duration::from_secs(30));

        limiter.record_response("llm", 200, &HeaderMap::new());
        assert_eq!(limiter.states.get("llm").unwrap().wait_time(), Duration::ZERO);

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_429s, 1);
    }

    #[test]
    fn test_exponential_backoff_without_retry_after() {
        let mut state = ServiceState::default();
        state.record_429(None);
        state.record_429(None);
        assert_eq!(state.consecutive_429s, 2);
        let wait = state.wait_time();
        assert!(wait > Duration::from_secs(3) && wait <= Duration::from_secs(4));
    }

    #[test]
    fn test_exhausted_quota_waits_for_reset() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("5"));
        let mut state = ServiceState::default();
        state.update_from_headers(&headers);
        assert!(state.wait_time() > Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_unknown_service_does_not_wait() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.wait_if_needed("search").await, Duration::ZERO);
    }
}
