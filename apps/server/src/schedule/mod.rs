//! Slot availability and booking lifecycle engine.
//!
//! Slots are never stored while free: a slot is identified by
//! `(date, start, duration)` and its occupancy is computed on read from two
//! sources, active bookings (`bookings` + `slot_claims`) and administrative
//! blocks (`blocked_slots`). Mutual exclusion is enforced by the primary key
//! of `slot_claims`, one row per occupied base unit.

pub mod blocks;
mod error;
pub mod generator;
pub mod ledger;
pub mod occupancy;
pub mod service;
pub mod slot;

pub use error::ScheduleError;

/// Timestamp stored on created/refunded records (UTC, RFC 3339).
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
