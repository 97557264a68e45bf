use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::blocks::{BlockRegistry, BlockReport, UnblockReport};
use super::generator::{ScheduleRules, SlotGenerator};
use super::ledger::{
    Booking, BookingDraft, BookingFilter, BookingLedger, BookingOrigin, BookingPolicy,
    BookingStats,
};
use super::occupancy::OccupancyIndex;
use super::slot::{Minute, TimeSlot};
use super::ScheduleError;

/// Stateless coordinator over the generator, occupancy index, block
/// registry and booking ledger. All durable state lives in the database.
#[derive(Debug, Clone)]
pub struct AvailabilityService {
    provider: String,
    generator: Arc<SlotGenerator>,
    index: OccupancyIndex,
    blocks: BlockRegistry,
    ledger: BookingLedger,
}

impl AvailabilityService {
    pub fn new(
        pool: SqlitePool,
        rules: ScheduleRules,
        policy: BookingPolicy,
        provider: impl Into<String>,
    ) -> Self {
        let generator = Arc::new(SlotGenerator::new(rules));
        Self {
            provider: provider.into(),
            index: OccupancyIndex::new(pool.clone(), generator.clone()),
            blocks: BlockRegistry::new(pool.clone(), generator.clone()),
            ledger: BookingLedger::new(pool, generator.clone(), policy),
            generator,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn rules(&self) -> &ScheduleRules {
        self.generator.rules()
    }

    /// Single-provider system: only the configured provider is known.
    fn check_provider(&self, provider: Option<&str>) -> Result<(), ScheduleError> {
        match provider {
            Some(p) if p != self.provider => Err(ScheduleError::UnknownProvider(p.to_string())),
            _ => Ok(()),
        }
    }

    pub async fn available_slots(
        &self,
        date: NaiveDate,
        duration: Minute,
        provider: Option<&str>,
    ) -> Result<Vec<TimeSlot>, ScheduleError> {
        self.check_provider(provider)?;
        self.index.annotate(date, duration).await
    }

    pub async fn slots_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        duration: Minute,
        provider: Option<&str>,
    ) -> Result<Vec<(NaiveDate, Vec<TimeSlot>)>, ScheduleError> {
        self.check_provider(provider)?;
        self.index.annotate_range(from, to, duration).await
    }

    pub async fn block_slots(
        &self,
        slot_ids: &[String],
        reason: &str,
    ) -> Result<BlockReport, ScheduleError> {
        self.blocks.block(slot_ids, reason).await
    }

    pub async fn unblock_slots(&self, slot_ids: &[String]) -> Result<UnblockReport, ScheduleError> {
        self.blocks.unblock(slot_ids).await
    }

    pub async fn create_booking(
        &self,
        draft: BookingDraft,
        origin: BookingOrigin,
    ) -> Result<Booking, ScheduleError> {
        self.ledger.create(draft, origin).await
    }

    pub async fn cancel_booking(&self, id: i64) -> Result<Booking, ScheduleError> {
        self.ledger.cancel(id).await
    }

    pub async fn get_booking(&self, id: i64) -> Result<Booking, ScheduleError> {
        self.ledger.get(id).await
    }

    pub async fn list_bookings(&self, filter: BookingFilter) -> Result<Vec<Booking>, ScheduleError> {
        self.ledger.list(filter).await
    }

    pub async fn booking_stats(&self) -> Result<BookingStats, ScheduleError> {
        self.ledger.stats().await
    }
}
