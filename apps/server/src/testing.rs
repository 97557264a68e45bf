//! Shared fixtures for unit tests.

use axum::Router;
use chrono::{NaiveDate, Weekday};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::AdminKey;
use crate::rate_limit::{RateLimit, RateLimiter, RateLimits};
use crate::schedule::generator::ScheduleRules;
use crate::schedule::ledger::{BookingDraft, BookingPolicy, PaymentStatus};
use crate::schedule::service::AvailabilityService;
use crate::schedule::slot::SlotId;
use crate::{db, AppState};

pub const PROVIDER: &str = "DR. NIK SARAFI";
pub const ADMIN_KEY: &str = "test-admin-key";

/// Single-connection in-memory database with migrations applied. The
/// connection must never be recycled or the database disappears.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// 09:00-12:00, weekends off, 30 and 45 minute slots.
pub fn test_rules() -> ScheduleRules {
    ScheduleRules::new(540, 720, vec![Weekday::Sat, Weekday::Sun], vec![30, 45]).unwrap()
}

pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn saturday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()
}

pub fn draft(slot: SlotId, payment_status: PaymentStatus) -> BookingDraft {
    BookingDraft {
        request_id: None,
        first_name: "Anna".into(),
        last_name: "Muster".into(),
        email: "anna@example.com".into(),
        slot,
        price: 120,
        payment_status,
    }
}

pub async fn test_service() -> AvailabilityService {
    test_service_with(BookingPolicy::default()).await
}

pub async fn test_service_with(policy: BookingPolicy) -> AvailabilityService {
    AvailabilityService::new(memory_pool().await, test_rules(), policy, PROVIDER)
}

pub async fn test_state() -> Arc<AppState> {
    let pool = memory_pool().await;
    let schedule =
        AvailabilityService::new(pool.clone(), test_rules(), BookingPolicy::default(), PROVIDER);
    Arc::new(AppState {
        db: pool,
        schedule,
        admin_key: AdminKey::new(Some(ADMIN_KEY)),
        started_at: Instant::now(),
    })
}

/// Router with generous limits so tests never trip them.
pub async fn test_app() -> Router {
    let generous = RateLimit::per_secs(1000, 60);
    test_app_with_limits(RateLimits {
        public: generous,
        booking: generous,
        admin: generous,
        admin_auth_failures: generous,
    })
    .await
}

pub async fn test_app_with_limits(limits: RateLimits) -> Router {
    crate::router(test_state().await, RateLimiter::new(limits))
}
