use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

use super::generator::SlotGenerator;
use super::ledger;
use super::slot::{Minute, SlotId, Span};
use super::{now_timestamp, ScheduleError};

/// Why a single slot id in a block or unblock batch was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCause {
    AlreadyBooked,
    InvalidSlotId,
    InvalidDuration,
    OutsideWorkingHours,
    TransientStorageFailure,
    StorageFailure,
}

impl RejectCause {
    fn from_error(err: &ScheduleError) -> Option<Self> {
        match err {
            ScheduleError::AlreadyBooked(_) => Some(RejectCause::AlreadyBooked),
            ScheduleError::InvalidDuration(_) => Some(RejectCause::InvalidDuration),
            ScheduleError::OutsideWorkingHours(_) => Some(RejectCause::OutsideWorkingHours),
            ScheduleError::InvalidSlotId(_)
            | ScheduleError::InvalidDate(_)
            | ScheduleError::InvalidTime(_) => Some(RejectCause::InvalidSlotId),
            ScheduleError::TransientStorageFailure(_) => Some(RejectCause::TransientStorageFailure),
            ScheduleError::Storage(_) => Some(RejectCause::StorageFailure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub slot_id: String,
    pub cause: RejectCause,
}

/// Per-item outcome of a block batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockReport {
    pub accepted: Vec<SlotId>,
    pub rejected: Vec<Rejection>,
}

/// Outcome of an unblock batch. Ids that were not blocked count as neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnblockReport {
    pub removed: u64,
    pub rejected: Vec<Rejection>,
}

/// Owns administratively blocked slot identities.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    pool: SqlitePool,
    generator: Arc<SlotGenerator>,
}

impl BlockRegistry {
    pub fn new(pool: SqlitePool, generator: Arc<SlotGenerator>) -> Self {
        Self { pool, generator }
    }

    /// Block each slot id independently. Slots under an active booking are
    /// rejected; the rest of the batch still goes through.
    pub async fn block(&self, slot_ids: &[String], reason: &str) -> Result<BlockReport, ScheduleError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ScheduleError::InvalidRequest("block reason must not be empty".into()));
        }

        let mut report = BlockReport::default();
        for raw in slot_ids {
            let outcome = match raw.parse::<SlotId>() {
                Ok(slot) => match self.generator.validate(&slot) {
                    Ok(()) => self.block_one(slot, reason).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok(slot) => report.accepted.push(slot),
                Err(e) => {
                    let Some(cause) = RejectCause::from_error(&e) else {
                        return Err(e);
                    };
                    if cause == RejectCause::StorageFailure {
                        tracing::error!(slot_id = %raw, error = %e, "block failed");
                    } else {
                        tracing::warn!(slot_id = %raw, ?cause, "block rejected");
                    }
                    report.rejected.push(Rejection {
                        slot_id: raw.clone(),
                        cause,
                    });
                }
            }
        }

        tracing::info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "block batch processed"
        );
        Ok(report)
    }

    async fn block_one(&self, slot: SlotId, reason: &str) -> Result<SlotId, ScheduleError> {
        let mut tx = self.pool.begin().await?;

        // Insert before checking claims so the write lock covers the check.
        sqlx::query(
            "INSERT INTO blocked_slots (date, start_minute, duration, reason, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (date, start_minute, duration) DO NOTHING",
        )
        .bind(slot.date)
        .bind(slot.start as i64)
        .bind(slot.duration as i64)
        .bind(reason)
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;

        if let Some(booking_id) = ledger::claimed_by(&mut tx, slot.date, slot.span()).await? {
            tx.rollback().await?;
            tracing::debug!(slot = %slot, booking_id, "slot held by booking");
            return Err(ScheduleError::AlreadyBooked(slot));
        }

        tx.commit().await?;
        Ok(slot)
    }

    /// Remove every block intersecting each named slot, the same rule
    /// annotation uses to report a slot as blocked. Ids that are not blocked
    /// (or not parseable) are skipped.
    pub async fn unblock(&self, slot_ids: &[String]) -> Result<UnblockReport, ScheduleError> {
        let mut report = UnblockReport::default();
        for raw in slot_ids {
            let Ok(slot) = raw.parse::<SlotId>() else {
                tracing::warn!(slot_id = %raw, "ignoring malformed slot id in unblock");
                continue;
            };

            match self.unblock_one(slot).await {
                Ok(removed) => report.removed += removed,
                Err(e) => {
                    let cause = RejectCause::from_error(&e).unwrap_or(RejectCause::StorageFailure);
                    tracing::error!(slot_id = %raw, error = %e, "unblock failed");
                    report.rejected.push(Rejection {
                        slot_id: raw.clone(),
                        cause,
                    });
                }
            }
        }

        tracing::info!(
            requested = slot_ids.len(),
            removed = report.removed,
            failed = report.rejected.len(),
            "unblock processed"
        );
        Ok(report)
    }

    async fn unblock_one(&self, slot: SlotId) -> Result<u64, ScheduleError> {
        let span = slot.span();
        let result = sqlx::query(
            "DELETE FROM blocked_slots
             WHERE date = ? AND start_minute < ? AND start_minute + duration > ?",
        )
        .bind(slot.date)
        .bind(span.end as i64)
        .bind(span.start as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Blocked ranges (with reasons) between two dates, inclusive.
pub(crate) async fn blocked_spans(
    conn: &mut SqliteConnection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<(NaiveDate, Span, String)>, ScheduleError> {
    let rows = sqlx::query_as::<_, (NaiveDate, i64, i64, String)>(
        "SELECT date, start_minute, duration, reason FROM blocked_slots
         WHERE date BETWEEN ? AND ?
         ORDER BY date ASC, start_minute ASC, created_at ASC",
    )
    .bind(from)
    .bind(to)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(date, start, duration, reason)| {
            let start = start as Minute;
            (date, Span::new(start, start + duration as Minute), reason)
        })
        .collect())
}

/// Whether any block intersects `span` on `date`.
pub(crate) async fn overlapping_block(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    span: Span,
) -> Result<bool, ScheduleError> {
    let found: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT 1 FROM blocked_slots
            WHERE date = ? AND start_minute < ? AND start_minute + duration > ?
         )",
    )
    .bind(date)
    .bind(span.end as i64)
    .bind(span.start as i64)
    .fetch_one(conn)
    .await?;
    Ok(found)
}
