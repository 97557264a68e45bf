use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

// ── Configuration ──

/// Route groups with independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Slot listings.
    Public,
    /// Customer booking creation.
    Booking,
    /// Everything behind the admin key.
    Admin,
}

/// `max_requests` per `window`, written `count/seconds` in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub const fn per_secs(max_requests: u32, secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(secs),
        }
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (count, secs) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected count/seconds, got {raw:?}"))?;
        let max_requests: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid request count {count:?}"))?;
        let secs: u64 = secs
            .trim()
            .parse()
            .map_err(|_| format!("invalid window {secs:?}"))?;
        if max_requests == 0 || secs == 0 {
            return Err(format!("count and window must be positive, got {raw:?}"));
        }
        Ok(Self::per_secs(max_requests, secs))
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.window.as_secs())
    }
}

/// Limits for every tier plus the failed admin key budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub public: RateLimit,
    pub booking: RateLimit,
    pub admin: RateLimit,
    /// Rejected admin keys allowed per client before it is locked out.
    pub admin_auth_failures: RateLimit,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            public: RateLimit::per_secs(60, 60),
            booking: RateLimit::per_secs(5, 300),
            admin: RateLimit::per_secs(120, 60),
            admin_auth_failures: RateLimit::per_secs(10, 900),
        }
    }
}

// ── Sliding window ──

/// Per-IP timestamps of counted events inside one window, oldest first.
#[derive(Debug)]
struct SlidingWindow {
    limit: RateLimit,
    hits: DashMap<IpAddr, VecDeque<Instant>>,
}

impl SlidingWindow {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            hits: DashMap::new(),
        }
    }

    fn evict(&self, hits: &mut VecDeque<Instant>, now: Instant) {
        while hits
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.limit.window)
        {
            hits.pop_front();
        }
    }

    /// Seconds until the oldest counted event leaves the window, at least 1.
    fn retry_after(&self, hits: &VecDeque<Instant>, now: Instant) -> u64 {
        hits.front()
            .map(|oldest| {
                (*oldest + self.limit.window)
                    .saturating_duration_since(now)
                    .as_secs()
            })
            .unwrap_or(0)
            .max(1)
    }

    /// Counts one event for `ip` unless its budget is spent.
    fn hit(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let mut hits = self.hits.entry(ip).or_default();
        self.evict(&mut hits, now);
        if hits.len() >= self.limit.max_requests as usize {
            return Err(self.retry_after(&hits, now));
        }
        hits.push_back(now);
        Ok(())
    }

    /// Like `hit` but never counts.
    fn ensure_open(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let Some(mut hits) = self.hits.get_mut(&ip) else {
            return Ok(());
        };
        self.evict(&mut hits, now);
        if hits.len() >= self.limit.max_requests as usize {
            return Err(self.retry_after(&hits, now));
        }
        Ok(())
    }

    fn record(&self, ip: IpAddr, now: Instant) {
        let mut hits = self.hits.entry(ip).or_default();
        self.evict(&mut hits, now);
        hits.push_back(now);
    }

    fn prune(&self, now: Instant) {
        self.hits.retain(|_, hits| {
            self.evict(hits, now);
            !hits.is_empty()
        });
    }

    fn tracked(&self) -> usize {
        self.hits.len()
    }
}

// ── Limiter ──

#[derive(Debug)]
struct Windows {
    public: SlidingWindow,
    booking: SlidingWindow,
    admin: SlidingWindow,
    admin_auth_failures: SlidingWindow,
}

/// In-memory per-IP limiter shared by all route groups. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<Windows>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            windows: Arc::new(Windows {
                public: SlidingWindow::new(limits.public),
                booking: SlidingWindow::new(limits.booking),
                admin: SlidingWindow::new(limits.admin),
                admin_auth_failures: SlidingWindow::new(limits.admin_auth_failures),
            }),
        }
    }

    fn tier(&self, tier: Tier) -> &SlidingWindow {
        match tier {
            Tier::Public => &self.windows.public,
            Tier::Booking => &self.windows.booking,
            Tier::Admin => &self.windows.admin,
        }
    }

    /// Counts a request from `ip`. `Err` carries the Retry-After seconds.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        self.tier(tier).hit(ip, Instant::now())
    }

    /// `Err` while `ip` has used up its failed admin key budget.
    pub fn check_admin_lockout(&self, ip: IpAddr) -> Result<(), u64> {
        self.windows
            .admin_auth_failures
            .ensure_open(ip, Instant::now())
    }

    pub fn record_admin_auth_failure(&self, ip: IpAddr) {
        self.windows
            .admin_auth_failures
            .record(ip, Instant::now());
    }

    /// Drops clients with no events left in their window.
    /// Called periodically from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let w = &self.windows;
        for window in [&w.public, &w.booking, &w.admin, &w.admin_auth_failures] {
            window.prune(now);
        }
        tracing::debug!(
            public = w.public.tracked(),
            booking = w.booking.tracked(),
            admin = w.admin.tracked(),
            auth_failures = w.admin_auth_failures.tracked(),
            "rate limiter cleanup"
        );
    }
}

// ── IP Extraction ──

/// Client IP from the first X-Forwarded-For hop, else the peer address.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

// ── 429 Response Builder ──

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(
        "rate_limited",
        format!("Too many requests. Try again in {} seconds", retry_after),
    );
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

// ── Middleware ──

async fn limit(
    limiter: &RateLimiter,
    tier: Tier,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check(tier, ip).map_err(|retry_after| {
        tracing::warn!(?tier, %ip, retry_after, "rate limit exceeded");
        too_many_requests(retry_after)
    })?;
    Ok(next.run(req).await)
}

/// Rate limiter for slot listings.
pub async fn rate_limit_public(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(&limiter, Tier::Public, req, next).await
}

/// Rate limiter for customer booking creation (strictest).
pub async fn rate_limit_booking(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(&limiter, Tier::Booking, req, next).await
}

/// Rate limiter for admin endpoints. Must wrap the admin key check: every
/// attempt counts against the tier, and 401 responses also count against
/// the lockout budget.
pub async fn rate_limit_admin(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check_admin_lockout(ip).map_err(|retry_after| {
        tracing::warn!(%ip, retry_after, "admin locked out after rejected keys");
        too_many_requests(retry_after)
    })?;

    let res = limit(&limiter, Tier::Admin, req, next).await?;
    if res.status() == StatusCode::UNAUTHORIZED {
        limiter.record_admin_auth_failure(ip);
    }
    Ok(res)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::testing::{test_app_with_limits, ADMIN_KEY};

    const GENEROUS: RateLimit = RateLimit::per_secs(1000, 60);

    fn limits() -> RateLimits {
        RateLimits {
            public: GENEROUS,
            booking: GENEROUS,
            admin: GENEROUS,
            admin_auth_failures: GENEROUS,
        }
    }

    fn client(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, last))
    }

    fn from_client(ip: &str, req: axum::http::request::Builder) -> Request<Body> {
        req.header("x-forwarded-for", ip).body(Body::empty()).unwrap()
    }

    fn admin_get(ip: &str, key: &str) -> Request<Body> {
        from_client(
            ip,
            Request::builder()
                .uri("/api/bookings")
                .header(header::AUTHORIZATION, format!("Bearer {key}")),
        )
    }

    async fn body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_rate_limit() {
        assert_eq!("60/60".parse::<RateLimit>(), Ok(RateLimit::per_secs(60, 60)));
        assert_eq!(" 5 / 300 ".parse::<RateLimit>(), Ok(RateLimit::per_secs(5, 300)));
        assert_eq!(RateLimit::per_secs(10, 900).to_string(), "10/900");
        assert!("60".parse::<RateLimit>().is_err());
        assert!("0/60".parse::<RateLimit>().is_err());
        assert!("5/0".parse::<RateLimit>().is_err());
        assert!("five/60".parse::<RateLimit>().is_err());
    }

    #[test]
    fn test_window_counts_per_client() {
        let window = SlidingWindow::new(RateLimit::per_secs(2, 60));
        let now = Instant::now();
        assert!(window.hit(client(1), now).is_ok());
        assert!(window.hit(client(1), now).is_ok());
        let retry_after = window.hit(client(1), now).unwrap_err();
        assert_eq!(retry_after, 60);
        assert!(window.hit(client(2), now).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let window = SlidingWindow::new(RateLimit::per_secs(2, 60));
        let start = Instant::now();
        window.hit(client(1), start).unwrap();
        window.hit(client(1), start + Duration::from_secs(30)).unwrap();

        // the first hit is 50s old: 10s left until it expires
        assert_eq!(
            window.hit(client(1), start + Duration::from_secs(50)),
            Err(10)
        );
        // at 60s only the second hit is still inside the window
        assert!(window.hit(client(1), start + Duration::from_secs(60)).is_ok());
        assert!(window.hit(client(1), start + Duration::from_secs(61)).is_err());
    }

    #[test]
    fn test_ensure_open_does_not_count() {
        let window = SlidingWindow::new(RateLimit::per_secs(1, 60));
        let now = Instant::now();
        for _ in 0..5 {
            assert!(window.ensure_open(client(1), now).is_ok());
        }
        window.record(client(1), now);
        assert!(window.ensure_open(client(1), now).is_err());
        assert!(window
            .ensure_open(client(1), now + Duration::from_secs(60))
            .is_ok());
    }

    #[test]
    fn test_prune_drops_idle_clients_only() {
        let window = SlidingWindow::new(RateLimit::per_secs(5, 60));
        let start = Instant::now();
        window.hit(client(1), start).unwrap();
        window.hit(client(2), start + Duration::from_secs(40)).unwrap();

        window.prune(start + Duration::from_secs(70));
        assert_eq!(window.tracked(), 1);
        assert!(window.hits.contains_key(&client(2)));
    }

    #[test]
    fn test_extract_client_ip_prefers_forwarded_header() {
        let req = from_client("203.0.113.7, 10.0.0.1", Request::builder());
        assert_eq!(
            extract_client_ip(&req),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );

        let req = from_client("not-an-ip", Request::builder());
        assert_eq!(extract_client_ip(&req), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_wrong_admin_keys_are_throttled() {
        let app = test_app_with_limits(RateLimits {
            admin: RateLimit::per_secs(3, 60),
            ..limits()
        })
        .await;

        for _ in 0..3 {
            let res = app
                .clone()
                .oneshot(admin_get("203.0.113.9", "guess"))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
        let res = app
            .clone()
            .oneshot(admin_get("203.0.113.9", "guess"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("retry-after"));
        assert_eq!(body(res).await["error"], "rate_limited");
    }

    #[tokio::test]
    async fn test_rejected_keys_lock_out_the_client() {
        let app = test_app_with_limits(RateLimits {
            admin_auth_failures: RateLimit::per_secs(2, 900),
            ..limits()
        })
        .await;

        for _ in 0..2 {
            let res = app
                .clone()
                .oneshot(admin_get("203.0.113.9", "guess"))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }

        // the right key no longer helps from the locked out address
        let res = app
            .clone()
            .oneshot(admin_get("203.0.113.9", ADMIN_KEY))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        let res = app
            .oneshot(admin_get("203.0.113.10", ADMIN_KEY))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_valid_admin_requests_do_not_lock_out() {
        let app = test_app_with_limits(RateLimits {
            admin_auth_failures: RateLimit::per_secs(1, 900),
            ..limits()
        })
        .await;

        for _ in 0..5 {
            let res = app
                .clone()
                .oneshot(admin_get("203.0.113.9", ADMIN_KEY))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_booking_tier_is_separate_from_listings() {
        let app = test_app_with_limits(RateLimits {
            booking: RateLimit::per_secs(1, 300),
            ..limits()
        })
        .await;

        let create = || {
            let payload = json!({
                "first_name": "Anna",
                "last_name": "Muster",
                "email": "anna@example.com",
                "date": "02.03.2026",
                "start_time": "10:00",
                "duration": 30,
                "price": 120
            });
            Request::builder()
                .method("POST")
                .uri("/api/create-booking")
                .header("x-forwarded-for", "203.0.113.20")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap()
        };

        let res = app.clone().oneshot(create()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app.clone().oneshot(create()).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("retry-after"));

        let listing = from_client(
            "203.0.113.20",
            Request::builder().uri("/api/available-slots?date=02.03.2026&duration=30"),
        );
        let res = app.oneshot(listing).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
