use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::ScheduleError;

/// Wire format for calendar dates (day.month.year).
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Minutes since midnight in the provider's time zone.
pub type Minute = u32;

// ── Date / time helpers ──

/// Parse a `DD.MM.YYYY` date.
pub fn parse_date(raw: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| ScheduleError::InvalidDate(raw.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a 24-hour `HH:MM` time into minutes since midnight.
pub fn parse_time(raw: &str) -> Result<Minute, ScheduleError> {
    let invalid = || ScheduleError::InvalidTime(raw.to_string());
    let (h, m) = raw.trim().split_once(':').ok_or_else(invalid)?;
    if h.len() != 2 || m.len() != 2 {
        return Err(invalid());
    }
    let hour: Minute = h.parse().map_err(|_| invalid())?;
    let min: Minute = m.parse().map_err(|_| invalid())?;
    // 24:00 is accepted as the end of the day
    if min >= 60 || hour > 24 || (hour == 24 && min != 0) {
        return Err(invalid());
    }
    Ok(hour * 60 + min)
}

/// Format minutes since midnight as `HH:MM`.
pub fn format_time(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

// ── Slot identity ──

/// Stable, derivable identity of a slot: date + start + duration.
///
/// Free slots are never stored; the identity alone is enough to block,
/// unblock or book a slot. The textual form is `DD.MM.YYYY-HH:MM-<minutes>`,
/// e.g. `02.03.2026-10:00-30`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId {
    pub date: NaiveDate,
    pub start: Minute,
    pub duration: Minute,
}

impl SlotId {
    pub fn new(date: NaiveDate, start: Minute, duration: Minute) -> Self {
        Self {
            date,
            start,
            duration,
        }
    }

    pub fn end(&self) -> Minute {
        self.start + self.duration
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end())
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            format_date(self.date),
            format_time(self.start),
            self.duration
        )
    }
}

impl FromStr for SlotId {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidSlotId(s.to_string());
        let mut parts = s.trim().splitn(3, '-');
        let (Some(date), Some(time), Some(duration)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let date = parse_date(date).map_err(|_| invalid())?;
        let start = parse_time(time).map_err(|_| invalid())?;
        let duration: Minute = duration.parse().map_err(|_| invalid())?;
        if duration == 0 {
            return Err(invalid());
        }
        Ok(Self::new(date, start, duration))
    }
}

impl Serialize for SlotId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ── Spans ──

/// Half-open minute range `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Annotated slots ──

/// Why a slot is (un)available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupancy {
    Free,
    Booked,
    Blocked { reason: String },
}

impl Occupancy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Occupancy::Free => "free",
            Occupancy::Booked => "booked",
            Occupancy::Blocked { .. } => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub id: SlotId,
    pub occupancy: Occupancy,
}

impl TimeSlot {
    pub fn is_available(&self) -> bool {
        self.occupancy == Occupancy::Free
    }
}
