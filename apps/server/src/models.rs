use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::schedule::blocks::{BlockReport, Rejection};
use crate::schedule::ledger::{Booking, BookingOrigin, BookingStats, PaymentStatus};
use crate::schedule::slot::{format_date, format_time, Minute, Occupancy, TimeSlot};

// ── Envelope ──

/// Every response is `{"ok": true, ...payload}` or
/// `{"ok": false, "error": <kind>, "message": <text>}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn error(kind: &'static str, msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(kind),
            message: Some(msg.into()),
        }
    }
}

// ── Views ──

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: i64,
    pub request_id: Option<String>,
    /// Wire names follow the admin frontend (`vorname`/`name`).
    #[serde(rename = "vorname")]
    pub first_name: String,
    #[serde(rename = "name")]
    pub last_name: String,
    pub email: String,
    /// `dd.mm.yyyy`
    pub booking_date: String,
    /// `HH:MM`
    pub booking_time: String,
    pub end_time: String,
    pub duration: i64,
    pub price: i64,
    pub payment_status: PaymentStatus,
    pub origin: BookingOrigin,
    pub created_at: String,
    pub refunded_at: Option<String>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        let slot = b.slot();
        Self {
            id: b.id,
            request_id: b.request_id,
            first_name: b.first_name,
            last_name: b.last_name,
            email: b.email,
            booking_date: format_date(slot.date),
            booking_time: format_time(slot.start),
            end_time: format_time(slot.end()),
            duration: b.duration,
            price: b.price,
            payment_status: b.payment_status,
            origin: b.origin,
            created_at: b.created_at,
            refunded_at: b.refunded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: Minute,
    pub is_available: bool,
    pub status: &'static str,
    /// `"booked"` for booked slots, the admin's reason for blocked ones.
    pub blocked_reason: Option<String>,
}

impl From<&TimeSlot> for SlotView {
    fn from(slot: &TimeSlot) -> Self {
        let blocked_reason = match &slot.occupancy {
            Occupancy::Free => None,
            Occupancy::Booked => Some("booked".to_string()),
            Occupancy::Blocked { reason } => Some(reason.clone()),
        };
        Self {
            id: slot.id.to_string(),
            date: format_date(slot.id.date),
            start_time: format_time(slot.id.start),
            end_time: format_time(slot.id.end()),
            duration: slot.id.duration,
            is_available: slot.is_available(),
            status: slot.occupancy.as_str(),
            blocked_reason,
        }
    }
}

pub fn slot_views(slots: &[TimeSlot]) -> Vec<SlotView> {
    slots.iter().map(SlotView::from).collect()
}

#[derive(Debug, Serialize)]
pub struct DayView {
    pub date: String,
    pub slots: Vec<SlotView>,
}

impl DayView {
    pub fn new(date: NaiveDate, slots: &[TimeSlot]) -> Self {
        Self {
            date: format_date(date),
            slots: slot_views(slots),
        }
    }
}

// ── Payloads ──

#[derive(Debug, Serialize)]
pub struct BookingsPayload {
    pub bookings: Vec<BookingView>,
}

#[derive(Debug, Serialize)]
pub struct BookingPayload {
    pub booking: BookingView,
}

#[derive(Debug, Serialize)]
pub struct StatsPayload {
    pub stats: BookingStats,
}

#[derive(Debug, Serialize)]
pub struct SlotsPayload {
    pub date: String,
    pub duration: Minute,
    pub slots: Vec<SlotView>,
}

/// `slots` is every slot of the range in order (what the admin calendar
/// reads); `days` groups the same slots per date.
#[derive(Debug, Serialize)]
pub struct DaysPayload {
    pub duration: Minute,
    pub slots: Vec<SlotView>,
    pub days: Vec<DayView>,
}

impl DaysPayload {
    pub fn new(duration: Minute, days: &[(NaiveDate, Vec<TimeSlot>)]) -> Self {
        Self {
            duration,
            slots: days.iter().flat_map(|(_, slots)| slots).map(SlotView::from).collect(),
            days: days.iter().map(|(date, slots)| DayView::new(*date, slots)).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlockPayload {
    pub report: BlockReport,
}

#[derive(Debug, Serialize)]
pub struct UnblockPayload {
    pub unblocked: u64,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Serialize)]
pub struct HealthPayload {
    pub status: &'static str,
    pub db: &'static str,
    pub uptime_secs: u64,
    pub version: &'static str,
}

// ── API request types ──

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    #[serde(default)]
    pub filter: String,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
    pub duration: Minute,
    pub attorney: Option<String>,
}

fn default_duration() -> Minute {
    30
}

#[derive(Debug, Deserialize)]
pub struct SlotsRangeQuery {
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_duration")]
    pub duration: Minute,
    pub attorney: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlockSlotsRequest {
    pub slot_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct UnblockSlotsRequest {
    pub slot_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub request_id: Option<String>,
    #[serde(alias = "vorname")]
    pub first_name: String,
    #[serde(alias = "name")]
    pub last_name: String,
    pub email: String,
    /// `dd.mm.yyyy`
    pub date: String,
    /// `HH:MM`
    pub start_time: String,
    pub duration: Minute,
    pub price: i64,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
}
