use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Per-client token bucket for the chat endpoint: 100 tokens refilled per
/// hour up to a 500-token capacity, one token per request.
#[derive(Clone)]
pub struct TokenBucketLimiter {
    // IP -> (available tokens, last refill instant)
    clients: Arc<Mutex<HashMap<String, (f64, Instant)>>>,
    capacity: f64,
    refill_per_sec: f64,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u32, refill_per_hour: u32) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity as f64,
            refill_per_sec: refill_per_hour as f64 / 3600.0,
        }
    }

    pub fn try_consume(&self, client_ip: &str, cost: f64) -> bool {
        let mut clients = self.clients.lock().unwrap();
        let now = Instant::now();

        let entry = clients
            .entry(client_ip.to_string())
            .or_insert((self.capacity, now));

        let elapsed = now.duration_since(entry.1);
        entry.0 = refill_tokens(entry.0, elapsed, self.refill_per_sec, self.capacity);
        entry.1 = now;

        if entry.0 >= cost {
            entry.0 -= cost;
            true
        } else {
            false
        }
    }

    // Full buckets carry no state worth keeping around.
    pub fn cleanup_idle(&self) {
        let mut clients = self.clients.lock().unwrap();
        let capacity = self.capacity;
        clients.retain(|_, (tokens, _)| *tokens < capacity);
    }
}

fn refill_tokens(tokens: f64, elapsed: Duration, refill_per_sec: f64, capacity: f64) -> f64 {
    (tokens + elapsed.as_secs_f64() * refill_per_sec).min(capacity)
}

pub async fn ai_rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, impl IntoResponse> {
    static AI_LIMITER: std::sync::OnceLock<TokenBucketLimiter> = std::sync::OnceLock::new();
    let limiter = AI_LIMITER.get_or_init(|| TokenBucketLimiter::new(500, 100));

    let client_ip = addr.ip().to_string();

    if !limiter.try_consume(&client_ip, 1.0) {
        tracing::warn!("AI rate limit exceeded for IP: {}", client_ip);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "error": "Rate limit exceeded. Please try again later.",
                "retry_after": 60
            })),
        ));
    }

    // Occasionally drop idle entries
    if rand::random::<u8>() < 10 {
        limiter.cleanup_idle();
    }

    Ok(next.run(request).await)
}

const SHIELD_BLOCKLIST: &[&str] = &["sqlmap", "nikto", "nessus", "masscan", "zgrab"];

fn shield_live() -> bool {
    std::env::var("SHIELD_MODE")
        .map(|mode| mode.eq_ignore_ascii_case("live"))
        .unwrap_or(false)
}

fn looks_hostile(user_agent: &str) -> bool {
    if user_agent.is_empty() {
        return true;
    }
    let ua = user_agent.to_ascii_lowercase();
    SHIELD_BLOCKLIST.iter().any(|marker| ua.contains(marker))
}

/// Shield check in front of the chat endpoint. Runs in dry-run mode unless
/// SHIELD_MODE=live; dry-run only logs what it would have blocked.
pub async fn shield_middleware(
    request: Request,
    next: Next,
) -> Result<Response, impl IntoResponse> {
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if looks_hostile(user_agent) {
        if shield_live() {
            tracing::warn!("Shield blocked request with user agent: {:?}", user_agent);
            return Err((
                StatusCode::FORBIDDEN,
                Json(json!({
                    "success": false,
                    "error": "Request blocked by security rules."
                })),
            ));
        }
        tracing::warn!("Shield (dry run) flagged request with user agent: {:?}", user_agent);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_exhausts_at_capacity() {
        let limiter = TokenBucketLimiter::new(3, 0);
        assert!(limiter.try_consume("10.0.0.1", 1.0));
        assert!(limiter.try_consume("10.0.0.1", 1.0));
        assert!(limiter.try_consume("10.0.0.1", 1.0));
        assert!(!limiter.try_consume("10.0.0.1", 1.0));
        // Other clients have their own bucket
        assert!(limiter.try_consume("10.0.0.2", 1.0));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let refilled = refill_tokens(499.0, Duration::from_secs(7200), 100.0 / 3600.0, 500.0);
        assert_eq!(refilled, 500.0);
    }

    #[test]
    fn test_refill_rate() {
        // 100 tokens per hour -> 36 seconds buys one token back
        let refilled = refill_tokens(0.0, Duration::from_secs(36), 100.0 / 3600.0, 500.0);
        assert!((refilled - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shield_blocklist() {
        assert!(looks_hostile(""));
        assert!(looks_hostile("sqlmap/1.7"));
        assert!(looks_hostile("Mozilla/5.0 Nikto/2.5"));
        assert!(!looks_hostile("Mozilla/5.0 (X11; Linux x86_64)"));
    }
}
