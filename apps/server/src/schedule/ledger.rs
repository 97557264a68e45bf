use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::blocks;
use super::generator::SlotGenerator;
use super::slot::{Minute, SlotId, Span};
use super::{now_timestamp, ScheduleError};

// ── Booking state ──

/// Payment lifecycle. The only transition is `completed -> refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Active bookings occupy their slots.
    pub fn is_active(&self) -> bool {
        !matches!(self, PaymentStatus::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(ScheduleError::InvalidRequest(format!(
                "unknown payment status {other:?}"
            ))),
        }
    }
}

/// Who asked for the booking. Admin bookings may be allowed over blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookingOrigin {
    Customer,
    Admin,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub request_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date: NaiveDate,
    pub start_minute: i64,
    pub duration: i64,
    pub price: i64,
    pub payment_status: PaymentStatus,
    pub origin: BookingOrigin,
    pub created_at: String,
    pub refunded_at: Option<String>,
}

impl Booking {
    pub fn slot(&self) -> SlotId {
        SlotId::new(self.date, self.start_minute as Minute, self.duration as Minute)
    }
}

/// Caller-supplied booking request.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    /// Stable id for safe retries: a second create with the same id returns
    /// the first booking.
    pub request_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub slot: SlotId,
    pub price: i64,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    All,
    Status(PaymentStatus),
}

impl FromStr for BookingFilter {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(BookingFilter::All),
            status => status.parse().map(BookingFilter::Status),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BookingStats {
    pub total: i64,
    pub pending: i64,
    pub completed: i64,
    pub refunded: i64,
}

/// Whether admin-created bookings may be placed over blocked slots.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingPolicy {
    pub admin_overrides_blocks: bool,
}

const BOOKING_COLUMNS: &str = "SELECT id, request_id, first_name, last_name, email, date,
            start_minute, duration, price, payment_status, origin, created_at, refunded_at
     FROM bookings";

// ── Ledger ──

/// Owns booking records and the per-base-unit slot claims that enforce
/// the no-double-booking invariant.
#[derive(Debug, Clone)]
pub struct BookingLedger {
    pool: SqlitePool,
    generator: Arc<SlotGenerator>,
    policy: BookingPolicy,
}

impl BookingLedger {
    pub fn new(pool: SqlitePool, generator: Arc<SlotGenerator>, policy: BookingPolicy) -> Self {
        Self {
            pool,
            generator,
            policy,
        }
    }

    /// Reserve the draft's slot range and record the booking, atomically.
    pub async fn create(
        &self,
        draft: BookingDraft,
        origin: BookingOrigin,
    ) -> Result<Booking, ScheduleError> {
        self.generator.validate(&draft.slot)?;
        if !draft.payment_status.is_active() {
            return Err(ScheduleError::InvalidRequest(
                "bookings start as pending or completed".into(),
            ));
        }

        let slot = draft.slot;
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock for every check below.
        let inserted = sqlx::query(
            "INSERT INTO bookings (request_id, first_name, last_name, email, date, start_minute,
             duration, price, payment_status, origin, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&draft.request_id)
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.email)
        .bind(slot.date)
        .bind(slot.start as i64)
        .bind(slot.duration as i64)
        .bind(draft.price)
        .bind(draft.payment_status)
        .bind(origin)
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await;

        let booking_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tx.rollback().await?;
                return self.replay(draft.request_id.as_deref()).await;
            }
            Err(e) => return Err(e.into()),
        };

        for minute in self.generator.base_units(&slot) {
            let claimed = sqlx::query(
                "INSERT INTO slot_claims (date, minute, booking_id) VALUES (?, ?, ?)",
            )
            .bind(slot.date)
            .bind(minute as i64)
            .bind(booking_id)
            .execute(&mut *tx)
            .await;

            match claimed {
                Ok(_) => {}
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    tx.rollback().await?;
                    tracing::warn!(slot = %slot, "booking rejected: slot already booked");
                    return Err(ScheduleError::SlotConflict(slot));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let blocks_apply = origin == BookingOrigin::Customer || !self.policy.admin_overrides_blocks;
        if blocks_apply && blocks::overlapping_block(&mut tx, slot.date, slot.span()).await? {
            tx.rollback().await?;
            tracing::warn!(slot = %slot, "booking rejected: slot is blocked");
            return Err(ScheduleError::SlotConflict(slot));
        }

        let booking = fetch_booking(&mut tx, booking_id)
            .await?
            .ok_or(ScheduleError::NotFound(booking_id))?;
        tx.commit().await?;

        tracing::info!(
            booking_id,
            slot = %slot,
            status = %booking.payment_status,
            origin = ?origin,
            "booking created"
        );
        Ok(booking)
    }

    /// A create retried with a known request id returns the original booking.
    async fn replay(&self, request_id: Option<&str>) -> Result<Booking, ScheduleError> {
        let Some(request_id) = request_id else {
            return Err(ScheduleError::Storage(
                "unique violation on booking insert".into(),
            ));
        };
        let query = format!("{BOOKING_COLUMNS} WHERE request_id = ?");
        let booking = sqlx::query_as::<_, Booking>(&query)
            .bind(request_id)
            .fetch_one(&self.pool)
            .await?;
        tracing::info!(booking_id = booking.id, request_id, "replayed idempotent create");
        Ok(booking)
    }

    /// Refund a completed booking and release its slots.
    pub async fn cancel(&self, id: i64) -> Result<Booking, ScheduleError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE bookings SET payment_status = 'refunded', refunded_at = ?
             WHERE id = ? AND payment_status = 'completed'",
        )
        .bind(now_timestamp())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let status: Option<PaymentStatus> =
                sqlx::query_scalar("SELECT payment_status FROM bookings WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(match status {
                None => ScheduleError::NotFound(id),
                Some(status) => {
                    tracing::warn!(booking_id = id, %status, "cancel rejected");
                    ScheduleError::InvalidState { id, status }
                }
            });
        }

        let released = sqlx::query("DELETE FROM slot_claims WHERE booking_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let booking = fetch_booking(&mut tx, id)
            .await?
            .ok_or(ScheduleError::NotFound(id))?;
        tx.commit().await?;

        tracing::info!(booking_id = id, released, "booking refunded, slots released");
        Ok(booking)
    }

    pub async fn get(&self, id: i64) -> Result<Booking, ScheduleError> {
        let mut conn = self.pool.acquire().await?;
        fetch_booking(&mut conn, id)
            .await?
            .ok_or(ScheduleError::NotFound(id))
    }

    /// Bookings in insertion order.
    pub async fn list(&self, filter: BookingFilter) -> Result<Vec<Booking>, ScheduleError> {
        let bookings = match filter {
            BookingFilter::All => {
                let query = format!("{BOOKING_COLUMNS} ORDER BY id ASC");
                sqlx::query_as::<_, Booking>(&query)
                    .fetch_all(&self.pool)
                    .await?
            }
            BookingFilter::Status(status) => {
                let query = format!("{BOOKING_COLUMNS} WHERE payment_status = ? ORDER BY id ASC");
                sqlx::query_as::<_, Booking>(&query)
                    .bind(status)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(bookings)
    }

    pub async fn stats(&self) -> Result<BookingStats, ScheduleError> {
        let stats = sqlx::query_as::<_, BookingStats>(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(payment_status = 'pending'), 0) AS pending,
                    COALESCE(SUM(payment_status = 'completed'), 0) AS completed,
                    COALESCE(SUM(payment_status = 'refunded'), 0) AS refunded
             FROM bookings",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

async fn fetch_booking(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Booking>, ScheduleError> {
    let query = format!("{BOOKING_COLUMNS} WHERE id = ?");
    let booking = sqlx::query_as::<_, Booking>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(booking)
}

/// Occupied ranges of active bookings between two dates (inclusive).
pub(crate) async fn active_spans(
    conn: &mut SqliteConnection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<(NaiveDate, Span)>, ScheduleError> {
    let rows = sqlx::query_as::<_, (NaiveDate, i64, i64)>(
        "SELECT date, start_minute, duration FROM bookings
         WHERE date BETWEEN ? AND ? AND payment_status IN ('pending', 'completed')
         ORDER BY date ASC, start_minute ASC",
    )
    .bind(from)
    .bind(to)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(date, start, duration)| {
            let start = start as Minute;
            (date, Span::new(start, start + duration as Minute))
        })
        .collect())
}

/// First active booking claiming any base unit inside `span`.
pub(crate) async fn claimed_by(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    span: Span,
) -> Result<Option<i64>, ScheduleError> {
    let booking_id = sqlx::query_scalar(
        "SELECT booking_id FROM slot_claims WHERE date = ? AND minute >= ? AND minute < ? LIMIT 1",
    )
    .bind(date)
    .bind(span.start as i64)
    .bind(span.end as i64)
    .fetch_optional(conn)
    .await?;
    Ok(booking_id)
}
