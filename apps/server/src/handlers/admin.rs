use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    Json,
};
use std::sync::Arc;

use super::{client::booking_draft, ApiResult};
use crate::schedule::ledger::{BookingFilter, BookingOrigin};
use crate::{models::*, AppState};

/// GET /api/bookings?filter=all|pending|completed|refunded
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    query: Result<Query<BookingsQuery>, QueryRejection>,
) -> ApiResult<BookingsPayload> {
    let Query(query) = query?;
    let filter: BookingFilter = query.filter.parse()?;

    let bookings = state.schedule.list_bookings(filter).await?;

    Ok(Json(ApiResponse::success(BookingsPayload {
        bookings: bookings.into_iter().map(BookingView::from).collect(),
    })))
}

/// GET /api/bookings/stats
pub async fn booking_stats(State(state): State<Arc<AppState>>) -> ApiResult<StatsPayload> {
    let stats = state.schedule.booking_stats().await?;
    Ok(Json(ApiResponse::success(StatsPayload { stats })))
}

/// GET /api/booking/{id}
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<BookingPayload> {
    let booking = state.schedule.get_booking(id).await?;
    Ok(Json(ApiResponse::success(BookingPayload {
        booking: booking.into(),
    })))
}

/// POST /api/cancel-booking/{id}: refund a completed booking and free its slot
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<BookingPayload> {
    let booking = state.schedule.cancel_booking(id).await?;

    Ok(Json(ApiResponse::success(BookingPayload {
        booking: booking.into(),
    })))
}

/// POST /api/block-slots
pub async fn block_slots(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BlockSlotsRequest>, JsonRejection>,
) -> ApiResult<BlockPayload> {
    let Json(req) = payload?;
    let report = state.schedule.block_slots(&req.slot_ids, &req.reason).await?;

    Ok(Json(ApiResponse::success(BlockPayload { report })))
}

/// POST /api/unblock-slots
pub async fn unblock_slots(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UnblockSlotsRequest>, JsonRejection>,
) -> ApiResult<UnblockPayload> {
    let Json(req) = payload?;
    let report = state.schedule.unblock_slots(&req.slot_ids).await?;

    Ok(Json(ApiResponse::success(UnblockPayload {
        unblocked: report.removed,
        rejected: report.rejected,
    })))
}

/// POST /api/admin/create-booking
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> ApiResult<BookingPayload> {
    let Json(req) = payload?;
    let draft = booking_draft(req)?;

    let booking = state
        .schedule
        .create_booking(draft, BookingOrigin::Admin)
        .await?;

    Ok(Json(ApiResponse::success(BookingPayload {
        booking: booking.into(),
    })))
}
