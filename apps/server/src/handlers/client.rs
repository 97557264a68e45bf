use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    Json,
};
use std::sync::Arc;

use super::ApiResult;
use crate::schedule::ledger::{BookingDraft, BookingOrigin, PaymentStatus};
use crate::schedule::slot::{format_date, parse_date, parse_time, SlotId};
use crate::schedule::ScheduleError;
use crate::{models::*, AppState};

/// Shared by the customer and admin create endpoints.
pub(crate) fn booking_draft(req: CreateBookingRequest) -> Result<BookingDraft, ScheduleError> {
    for (field, value) in [
        ("first_name", &req.first_name),
        ("last_name", &req.last_name),
        ("email", &req.email),
    ] {
        if value.trim().is_empty() {
            return Err(ScheduleError::InvalidRequest(format!("{field} is required")));
        }
    }
    if !req.email.contains('@') {
        return Err(ScheduleError::InvalidRequest("email is invalid".into()));
    }
    if req.price < 0 {
        return Err(ScheduleError::InvalidRequest("price must not be negative".into()));
    }

    let date = parse_date(&req.date)?;
    let start = parse_time(&req.start_time)?;

    Ok(BookingDraft {
        request_id: req.request_id.filter(|r| !r.is_empty()),
        first_name: req.first_name.trim().to_string(),
        last_name: req.last_name.trim().to_string(),
        email: req.email.trim().to_string(),
        slot: SlotId::new(date, start, req.duration),
        price: req.price,
        payment_status: req.payment_status.unwrap_or(PaymentStatus::Pending),
    })
}

// ── Endpoints ──

/// GET /api/available-slots?date=DD.MM.YYYY&duration=30&attorney=...
pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> ApiResult<SlotsPayload> {
    let Query(query) = query?;
    let date = parse_date(&query.date)?;

    let slots = state
        .schedule
        .available_slots(date, query.duration, query.attorney.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(SlotsPayload {
        date: format_date(date),
        duration: query.duration,
        slots: slot_views(&slots),
    })))
}

/// GET /api/slots-range?start_date=..&end_date=..&duration=30
pub async fn slots_range(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SlotsRangeQuery>, QueryRejection>,
) -> ApiResult<DaysPayload> {
    let Query(query) = query?;
    let from = parse_date(&query.start_date)?;
    let to = parse_date(&query.end_date)?;

    let days = state
        .schedule
        .slots_range(from, to, query.duration, query.attorney.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(DaysPayload::new(query.duration, &days))))
}

/// POST /api/create-booking
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> ApiResult<BookingPayload> {
    let Json(req) = payload?;
    let draft = booking_draft(req)?;

    let booking = state
        .schedule
        .create_booking(draft, BookingOrigin::Customer)
        .await?;

    Ok(Json(ApiResponse::success(BookingPayload {
        booking: booking.into(),
    })))
}
