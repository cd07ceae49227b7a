//! API middleware.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn, Span};
use uuid::Uuid;

use recipe_models::{Role, UserId};

use crate::auth::{bearer_token, JwtKeys};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::metrics;

/// Rate limiter for a single caller.
pub type CallerRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Maximum number of callers to track in the rate limiter cache.
const MAX_RATE_LIMITER_ENTRIES: usize = 10_000;

/// Who a request is throttled as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateKey {
    Anonymous(IpAddr),
    Customer(UserId),
    Seller(UserId),
}

impl RateKey {
    pub fn bucket(&self) -> &'static str {
        match self {
            RateKey::Anonymous(_) => "anon",
            RateKey::Customer(_) => "customer",
            RateKey::Seller(_) => "seller",
        }
    }
}

fn quota(requests_per_second: u32, burst: u32) -> Quota {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst.max(requests_per_second)).unwrap_or(rate);
    Quota::per_second(rate).allow_burst(burst)
}

/// Per-caller rate limiter cache with automatic cleanup.
///
/// Anonymous callers are keyed by IP; authenticated customers and sellers
/// by user ID, each class with its own quota.
#[derive(Clone)]
pub struct RateLimiterCache {
    limiters: Arc<RwLock<HashMap<RateKey, (Arc<CallerRateLimiter>, Instant)>>>,
    anonymous: Quota,
    customer: Quota,
    seller: Quota,
    /// Time-to-live for cached rate limiters
    ttl: Duration,
}

impl RateLimiterCache {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            limiters: Arc::new(RwLock::new(HashMap::new())),
            anonymous: quota(config.rate_limit_rps, config.rate_limit_burst),
            customer: quota(config.rate_limit_customer_rps, config.rate_limit_burst),
            seller: quota(config.rate_limit_seller_rps, config.rate_limit_burst),
            ttl: Duration::from_secs(3600),
        }
    }

    fn quota_for(&self, key: &RateKey) -> Quota {
        match key {
            RateKey::Anonymous(_) => self.anonymous,
            RateKey::Customer(_) => self.customer,
            RateKey::Seller(_) => self.seller,
        }
    }

    /// Clean up expired rate limiters to prevent memory leaks.
    async fn cleanup_expired(&self) {
        let mut limiters = self.limiters.write().await;
        let now = Instant::now();

        limiters.retain(|_, (_, created_at)| now.duration_since(*created_at) < self.ttl);

        if limiters.len() > MAX_RATE_LIMITER_ENTRIES {
            let mut entries: Vec<_> = limiters.iter().map(|(key, (_, t))| (*key, *t)).collect();
            entries.sort_by_key(|(_, t)| *t);

            let to_remove = limiters.len() - MAX_RATE_LIMITER_ENTRIES;
            for (key, _) in entries.into_iter().take(to_remove) {
                limiters.remove(&key);
            }
            warn!("Rate limiter cache exceeded capacity, removed {} entries", to_remove);
        }
    }

    /// Get or create the rate limiter for a caller.
    pub async fn get_limiter(&self, key: RateKey) -> Arc<CallerRateLimiter> {
        {
            let limiters = self.limiters.read().await;
            if let Some((limiter, _)) = limiters.get(&key) {
                return Arc::clone(limiter);
            }
        }

        let mut limiters = self.limiters.write().await;
        // Double-check after acquiring write lock
        if let Some((limiter, _)) = limiters.get(&key) {
            return Arc::clone(limiter);
        }

        if limiters.len() >= MAX_RATE_LIMITER_ENTRIES {
            drop(limiters);
            self.cleanup_expired().await;
            limiters = self.limiters.write().await;
        }

        let limiter = Arc::new(RateLimiter::direct(self.quota_for(&key)));
        limiters.insert(key, (Arc::clone(&limiter), Instant::now()));
        limiter
    }

    /// Check rate limit for a caller.
    pub async fn check(&self, key: RateKey) -> bool {
        self.get_limiter(key).await.check().is_ok()
    }
}

/// State for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    pub cache: Arc<RateLimiterCache>,
    pub jwt: Arc<JwtKeys>,
}

/// Create CORS layer.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::{header, Method};

    let allowed_headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
    ];

    let exposed_headers = [
        header::CONTENT_LENGTH,
        header::CONTENT_TYPE,
        header::CONTENT_DISPOSITION,
    ];

    let allowed_methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
            .allow_origin(Any)
            .max_age(Duration::from_secs(600))
    } else {
        // tower-http rejects credentials combined with wildcard headers
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
            .expose_headers(exposed_headers)
            .allow_credentials(true)
            .allow_origin(origins)
            .max_age(Duration::from_secs(600))
    }
}

/// Security headers middleware.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("camera=(), geolocation=(), microphone=(), payment=()"),
    );
    headers.insert("Cross-Origin-Opener-Policy", HeaderValue::from_static("same-origin"));

    response
}

/// Request ID middleware.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = request
        .headers()
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());
    Span::current().record("request_id", &request_id);

    let mut response = next.run(request).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-ID", header_value);
    }

    response
}

/// Request logging middleware.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let duration = start.elapsed();

    // Skip probe logging
    if !matches!(uri.path(), "/health" | "/health/" | "/healthz" | "/ready") {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

/// Rate limiting middleware.
///
/// A verifiable bearer token selects the caller's role quota; everything
/// else is throttled per client IP. Requests with no identifiable caller
/// pass through.
pub async fn rate_limit_middleware(
    State(limits): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if let Some(key) = rate_key(&limits.jwt, &request) {
        if !limits.cache.check(key).await {
            warn!(bucket = key.bucket(), "Rate limit exceeded");
            metrics::record_rate_limit_hit(key.bucket());
            return ApiError::RateLimited.into_response();
        }
    }

    next.run(request).await
}

fn rate_key(jwt: &JwtKeys, request: &Request<Body>) -> Option<RateKey> {
    let claims = bearer_token(request.headers())
        .ok()
        .flatten()
        .and_then(|token| jwt.verify(token).ok());

    if let Some(claims) = claims {
        if let Ok(user_id) = claims.user_id() {
            return Some(match claims.role {
                Role::Customer => RateKey::Customer(user_id),
                Role::Seller => RateKey::Seller(user_id),
            });
        }
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    client_ip(request.headers(), peer).map(RateKey::Anonymous)
}

/// Client IP from proxy headers, falling back to the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    // Take the first IP in the chain (original client)
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    if forwarded.is_some() {
        return forwarded;
    }

    let real_ip = headers
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok());
    if real_ip.is_some() {
        return real_ip;
    }

    peer.map(|addr| addr.ip())
}
