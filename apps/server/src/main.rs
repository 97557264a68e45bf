mod auth;
mod config;
mod db;
mod handlers;
mod models;
mod rate_limit;
mod schedule;
#[cfg(test)]
mod testing;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use auth::AdminKey;
use config::Config;
use rate_limit::{rate_limit_admin, rate_limit_booking, rate_limit_public, RateLimiter};
use schedule::service::AvailabilityService;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub schedule: AvailabilityService,
    pub admin_key: AdminKey,
    pub started_at: Instant,
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

/// Build the HTTP surface. Split out of `main` so tests can drive it.
pub fn router(state: Arc<AppState>, limiter: RateLimiter) -> Router {
    // 1. No-limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: slot listings
    let public_routes = Router::new()
        .route(
            "/api/available-slots",
            get(handlers::client::available_slots),
        )
        .route("/api/slots-range", get(handlers::client::slots_range))
        .layer(from_fn_with_state(limiter.clone(), rate_limit_public));

    // 3. Booking creation: strictest limit
    let booking_routes = Router::new()
        .route(
            "/api/create-booking",
            post(handlers::client::create_booking),
        )
        .layer(from_fn_with_state(limiter.clone(), rate_limit_booking));

    // 4. Admin: rate limited outside the key check so rejected keys count
    let admin_routes = Router::new()
        .route("/api/bookings", get(handlers::admin::list_bookings))
        .route("/api/bookings/stats", get(handlers::admin::booking_stats))
        .route("/api/booking/{id}", get(handlers::admin::get_booking))
        .route(
            "/api/cancel-booking/{id}",
            post(handlers::admin::cancel_booking),
        )
        .route("/api/block-slots", post(handlers::admin::block_slots))
        .route("/api/unblock-slots", post(handlers::admin::unblock_slots))
        .route(
            "/api/admin/create-booking",
            post(handlers::admin::create_booking),
        )
        .layer(from_fn_with_state(state.clone(), auth::require_admin))
        .layer(from_fn_with_state(limiter, rate_limit_admin));

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(admin_routes)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Tracing ──
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // ── Database ──
    let pool = db::connect(&config.database_url, config.busy_timeout).await?;
    db::run_migrations(&pool).await?;

    let schedule = AvailabilityService::new(
        pool.clone(),
        config.rules.clone(),
        config.policy,
        config.provider.clone(),
    );
    let rules = schedule.rules();
    tracing::info!(
        provider = schedule.provider(),
        day_start = rules.day_start(),
        day_end = rules.day_end(),
        base_unit = rules.base_unit(),
        durations = ?rules.durations(),
        admin_overrides_blocks = config.policy.admin_overrides_blocks,
        "schedule configured"
    );

    let state = Arc::new(AppState {
        db: pool,
        schedule,
        admin_key: AdminKey::new(config.admin_api_key.as_deref()),
        started_at: Instant::now(),
    });

    // ── Rate limiter ──
    let limits = config.rate_limits;
    tracing::info!(
        public = %limits.public,
        booking = %limits.booking,
        admin = %limits.admin,
        admin_auth_failures = %limits.admin_auth_failures,
        "rate limits configured"
    );
    let rate_limiter = RateLimiter::new(limits);

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist CORS_ORIGIN when configured, otherwise allow any ──
    let cors = match &config.cors_origin {
        Some(origin) => {
            let origin: axum::http::HeaderValue = origin
                .parse()
                .map_err(|_| anyhow::anyhow!("CORS_ORIGIN must be a valid origin"))?;
            CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = router(state, rate_limiter)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = config.addr();
    tracing::info!("Slot booking server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
