use thiserror::Error;

use super::ledger::PaymentStatus;
use super::slot::SlotId;

/// SQLite primary result codes that mean "try again later".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unsupported slot duration: {0} minutes")]
    InvalidDuration(u32),

    #[error("slot {0} overlaps an active booking or block")]
    SlotConflict(SlotId),

    #[error("slot {0} is occupied by an active booking")]
    AlreadyBooked(SlotId),

    #[error("booking {id} is {status}; only completed bookings can be cancelled")]
    InvalidState { id: i64, status: PaymentStatus },

    #[error("booking {0} not found")]
    NotFound(i64),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("invalid date {0:?}, expected DD.MM.YYYY")]
    InvalidDate(String),

    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("invalid slot id {0:?}")]
    InvalidSlotId(String),

    #[error("slot {0} is outside working hours")]
    OutsideWorkingHours(SlotId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage temporarily unavailable: {0}")]
    TransientStorageFailure(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ScheduleError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleError::InvalidDuration(_) => "invalid_duration",
            ScheduleError::SlotConflict(_) => "slot_conflict",
            ScheduleError::AlreadyBooked(_) => "already_booked",
            ScheduleError::InvalidState { .. } => "invalid_state",
            ScheduleError::NotFound(_) => "not_found",
            ScheduleError::UnknownProvider(_) => "unknown_provider",
            ScheduleError::InvalidDate(_) => "invalid_date",
            ScheduleError::InvalidTime(_) => "invalid_time",
            ScheduleError::InvalidSlotId(_) => "invalid_slot_id",
            ScheduleError::OutsideWorkingHours(_) => "outside_working_hours",
            ScheduleError::InvalidRequest(_) => "invalid_request",
            ScheduleError::TransientStorageFailure(_) => "transient_storage_failure",
            ScheduleError::Storage(_) => "storage_error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ScheduleError::TransientStorageFailure(_))
    }
}

impl From<sqlx::Error> for ScheduleError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
            _ => false,
        };
        if transient {
            ScheduleError::TransientStorageFailure(err.to_string())
        } else {
            ScheduleError::Storage(err.to_string())
        }
    }
}
