//! In-memory sliding-window rate limiting keyed by peer identity.
//!
//! The store is process-local by design (single node, single database);
//! it is created at router build time and torn down with the process.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde_json::json;

use crate::config::RateLimitConfig;
use crate::storage::now_ms;

pub struct RateLimiter {
    config: RateLimitConfig,
    trust_proxy: bool,
    hits: DashMap<String, Vec<i64>>,
}

/// Outcome of one admission check.
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch seconds when the oldest counted hit leaves the window.
    pub reset_secs: i64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, trust_proxy: bool) -> Self {
        Self {
            config,
            trust_proxy,
            hits: DashMap::new(),
        }
    }

    /// Slide the window for `key` and admit or refuse the hit.
    pub fn check(&self, key: &str, now_ms: i64) -> Admission {
        let window_ms = (self.config.window_secs * 1000) as i64;
        let mut entry = self.hits.entry(key.to_string()).or_default();
        entry.retain(|&t| now_ms - t < window_ms);
        let allowed = (entry.len() as u32) < self.config.max_requests;
        if allowed {
            entry.push(now_ms);
        }
        let oldest = entry.first().copied().unwrap_or(now_ms);
        Admission {
            allowed,
            remaining: self.config.max_requests.saturating_sub(entry.len() as u32),
            reset_secs: (oldest + window_ms) / 1000,
        }
    }

    /// Identify the caller: the first `X-Forwarded-For` hop when behind a
    /// trusted proxy, else the socket peer.
    fn peer_key(&self, request: &Request) -> String {
        if self.trust_proxy {
            if let Some(forwarded) = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
            {
                if let Some(first) = forwarded.split(',').next() {
                    let first = first.trim();
                    if !first.is_empty() {
                        return first.to_string();
                    }
                }
            }
        }
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| "local".to_string())
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = limiter.peer_key(&request);
    let admission = limiter.check(&key, now_ms());

    if !admission.allowed {
        let retry_after = (admission.reset_secs - now_ms() / 1000).max(1);
        let body = json!({
            "error": {
                "code": "rate_limited",
                "message": limiter.config.message,
            }
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        set_limit_headers(&mut response, &limiter.config, &admission);
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert("Retry-After", value);
        }
        return response;
    }

    let mut response = next.run(request).await;
    set_limit_headers(&mut response, &limiter.config, &admission);
    response
}

fn set_limit_headers(response: &mut Response, config: &RateLimitConfig, admission: &Admission) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&config.max_requests.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&admission.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&admission.reset_secs.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            RateLimitConfig {
                enabled: true,
                max_requests: max,
                window_secs,
                message: "slow down".to_string(),
            },
            false,
        )
    }

    #[test]
    fn test_window_admits_up_to_max() {
        let rl = limiter(3, 60);
        let t0 = 1_000_000;
        assert!(rl.check("peer", t0).allowed);
        assert!(rl.check("peer", t0 + 1).allowed);
        assert!(rl.check("peer", t0 + 2).allowed);
        let refused = rl.check("peer", t0 + 3);
        assert!(!refused.allowed);
        assert_eq!(refused.remaining, 0);
    }

    #[test]
    fn test_window_slides() {
        let rl = limiter(1, 1);
        let t0 = 5_000_000;
        assert!(rl.check("peer", t0).allowed);
        assert!(!rl.check("peer", t0 + 500).allowed);
        // A second later the first hit has left the window.
        assert!(rl.check("peer", t0 + 1001).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let rl = limiter(1, 60);
        let t0 = 0;
        assert!(rl.check("a", t0).allowed);
        assert!(rl.check("b", t0).allowed);
        assert!(!rl.check("a", t0 + 1).allowed);
    }
}
