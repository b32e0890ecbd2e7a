//! Per-client rate limiting.
//!
//! Each (client IP, tier) pair owns a token bucket holding up to the tier's
//! per-window budget. Tokens refill continuously at `budget / window`, so a
//! client that pauses regains capacity gradually instead of at a hard
//! window boundary.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

/// Budget class of an endpoint group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Authenticated JSON reads and logout
    Api,
    /// Image uploads, page form and JSON
    Upload,
    /// Login and registration submissions
    Auth,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Outcome of charging one request against a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Limiting is switched off
    Unlimited,
    Allowed {
        limit: u32,
        remaining: u32,
        /// Seconds until the bucket is full again
        reset_after: u64,
    },
    Limited {
        limit: u32,
        /// Seconds until the next token is available
        retry_after: u64,
    },
}

#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(IpAddr, Tier), Bucket>,
    config: RateLimitConfig,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            window: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    pub fn budget(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Api => self.config.api_requests_per_window,
            Tier::Upload => self.config.upload_requests_per_window,
            Tier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Charge one request for `ip` in `tier`.
    pub fn check(&self, ip: IpAddr, tier: Tier) -> Verdict {
        if !self.config.enabled {
            return Verdict::Unlimited;
        }

        let limit = self.budget(tier);
        let capacity = f64::from(limit);
        // Tokens per second
        let rate = capacity / self.window.as_secs_f64();
        let now = Instant::now();

        let mut bucket = self.buckets.entry((ip, tier)).or_insert_with(|| Bucket {
            tokens: capacity,
            refilled_at: now,
        });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.refilled_at = now;

        if bucket.tokens < 1.0 {
            let retry_after = if rate > 0.0 {
                ((1.0 - bucket.tokens) / rate).ceil() as u64
            } else {
                self.window.as_secs()
            };
            return Verdict::Limited {
                limit,
                retry_after: retry_after.max(1),
            };
        }

        bucket.tokens -= 1.0;
        Verdict::Allowed {
            limit,
            remaining: bucket.tokens.floor() as u32,
            reset_after: ((capacity - bucket.tokens) / rate).ceil() as u64,
        }
    }

    /// Drop buckets that have been idle long enough to be full again.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let window = self.window;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.refilled_at) < window);
    }

    pub fn entry_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Client IP: forwarding headers first, then the peer address.
fn client_ip(request: &Request<Body>) -> IpAddr {
    forwarded_ip(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header_value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    // X-Forwarded-For lists the client first
    header_value("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .or_else(|| header_value("x-real-ip").and_then(|ip| ip.trim().parse().ok()))
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, request, next, Tier::Api).await
}

pub async fn rate_limit_upload(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, request, next, Tier::Upload).await
}

/// Only submissions count; rendering the forms is free.
pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::GET {
        return next.run(request).await;
    }
    enforce(&state, request, next, Tier::Auth).await
}

async fn enforce(state: &AppState, request: Request<Body>, next: Next, tier: Tier) -> Response {
    let ip = client_ip(&request);

    match state.rate_limiter.check(ip, tier) {
        Verdict::Unlimited => next.run(request).await,
        Verdict::Allowed {
            limit,
            remaining,
            reset_after,
        } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_after));
            response
        }
        Verdict::Limited { limit, retry_after } => {
            tracing::warn!(%ip, ?tier, retry_after, "Rate limit exceeded");
            let mut response = ApiError::rate_limited(format!(
                "Too many requests. Try again in {} seconds.",
                retry_after
            ))
            .into_response();
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
            response
        }
    }
}

/// Periodically drop idle buckets.
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                entries = rate_limiter.entry_count(),
                "Rate limiter cleanup complete"
            );
        }
    });
}
