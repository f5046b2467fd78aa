//! Rate limiting middleware for the REST API

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Rate limiter tracking requests per caller within a fixed one-minute
/// window. Callers are keyed by API key when the request carries one,
/// falling back to client IP for unauthenticated paths.
#[derive(Clone)]
pub struct RateLimiter {
    /// Maximum requests per minute
    max_requests: u32,
    /// Request tracking: caller key -> (count, window_start)
    requests: Arc<RwLock<HashMap<String, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            max_requests: requests_per_minute,
            requests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check if a request is allowed for the given caller
    pub async fn check_rate_limit(&self, caller: &str) -> bool {
        let mut requests = self.requests.write().await;
        let now = Instant::now();
        let window = Duration::from_secs(60);

        match requests.get_mut(caller) {
            Some((count, start)) => {
                if now.duration_since(*start) > window {
                    // Reset window
                    *count = 1;
                    *start = now;
                    true
                } else if *count < self.max_requests {
                    *count += 1;
                    true
                } else {
                    false
                }
            }
            None => {
                requests.insert(caller.to_string(), (1, now));
                true
            }
        }
    }

    /// Clean up expired entries (call periodically)
    pub async fn cleanup_expired(&self) {
        let mut requests = self.requests.write().await;
        let now = Instant::now();
        let window = Duration::from_secs(60);

        requests.retain(|_, (_, start)| now.duration_since(*start) <= window);
    }
}

/// Identifies the caller for rate limiting purposes.
fn caller_key(request: &Request) -> String {
    if let Some(token) = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        return format!("key:{}", token);
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| format!("ip:{}", s.trim()))
        .unwrap_or_else(|| "ip:127.0.0.1".to_string())
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let caller = caller_key(&request);

    if limiter.check_rate_limit(&caller).await {
        next.run(request).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
        )
            .into_response()
    }
}
