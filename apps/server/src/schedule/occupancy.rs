use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::blocks;
use super::generator::SlotGenerator;
use super::ledger;
use super::slot::{Minute, Occupancy, SlotId, Span, TimeSlot};
use super::ScheduleError;

/// Longest date range a single range query may cover.
pub const MAX_RANGE_DAYS: i64 = 62;

/// Booked and blocked ranges of one day, read from one snapshot.
#[derive(Debug, Default, Clone)]
pub struct DayOccupancy {
    booked: Vec<Span>,
    blocked: Vec<(Span, String)>,
}

impl DayOccupancy {
    pub fn new(booked: Vec<Span>, blocked: Vec<(Span, String)>) -> Self {
        Self { booked, blocked }
    }

    /// Booked wins over blocked.
    pub fn classify(&self, slot: &SlotId) -> Occupancy {
        let span = slot.span();
        if self.booked.iter().any(|b| b.overlaps(&span)) {
            return Occupancy::Booked;
        }
        match self.blocked.iter().find(|(b, _)| b.overlaps(&span)) {
            Some((_, reason)) => Occupancy::Blocked {
                reason: reason.clone(),
            },
            None => Occupancy::Free,
        }
    }

    pub fn annotate(&self, skeleton: Vec<SlotId>) -> Vec<TimeSlot> {
        skeleton
            .into_iter()
            .map(|id| TimeSlot {
                occupancy: self.classify(&id),
                id,
            })
            .collect()
    }
}

/// Read-time join of the booking ledger and the block registry.
///
/// Holds no state between calls; every annotation reads both sources inside
/// a single read transaction so a concurrent write is seen entirely or not
/// at all.
#[derive(Debug, Clone)]
pub struct OccupancyIndex {
    pool: SqlitePool,
    generator: Arc<SlotGenerator>,
}

impl OccupancyIndex {
    pub fn new(pool: SqlitePool, generator: Arc<SlotGenerator>) -> Self {
        Self { pool, generator }
    }

    pub async fn annotate(
        &self,
        date: NaiveDate,
        duration: Minute,
    ) -> Result<Vec<TimeSlot>, ScheduleError> {
        let skeleton = self.generator.generate(date, duration)?;
        if skeleton.is_empty() {
            return Ok(Vec::new());
        }
        let mut days = self.load(date, date).await?;
        let day = days.remove(&date).unwrap_or_default();
        Ok(day.annotate(skeleton))
    }

    /// Annotate every day in `[from, to]`.
    pub async fn annotate_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        duration: Minute,
    ) -> Result<Vec<(NaiveDate, Vec<TimeSlot>)>, ScheduleError> {
        self.generator.check_duration(duration)?;
        if to < from {
            return Err(ScheduleError::InvalidRequest(
                "end date is before start date".into(),
            ));
        }
        if (to - from).num_days() >= MAX_RANGE_DAYS {
            return Err(ScheduleError::InvalidRequest(format!(
                "date range is limited to {MAX_RANGE_DAYS} days"
            )));
        }

        // One snapshot for the whole range
        let mut days = self.load(from, to).await?;

        let mut result = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let skeleton = self.generator.generate(date, duration)?;
            let day = days.remove(&date).unwrap_or_default();
            result.push((date, day.annotate(skeleton)));
        }
        Ok(result)
    }

    async fn load(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, DayOccupancy>, ScheduleError> {
        let mut tx = self.pool.begin().await?;
        let booked = ledger::active_spans(&mut tx, from, to).await?;
        let blocked = blocks::blocked_spans(&mut tx, from, to).await?;
        tx.commit().await?;

        let mut days: BTreeMap<NaiveDate, DayOccupancy> = BTreeMap::new();
        for (date, span) in booked {
            days.entry(date).or_default().booked.push(span);
        }
        for (date, span, reason) in blocked {
            days.entry(date).or_default().blocked.push((span, reason));
        }
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::blocks::BlockRegistry;
    use crate::schedule::ledger::{BookingLedger, BookingOrigin, BookingPolicy, PaymentStatus};
    use crate::testing::{draft, memory_pool, monday, saturday, test_rules};

    fn slot(start: Minute, duration: Minute) -> SlotId {
        SlotId::new(monday(), start, duration)
    }

    #[test]
    fn test_classify_precedence() {
        let day = DayOccupancy::new(
            vec![Span::new(600, 630)],
            vec![(Span::new(600, 630), "x".into()), (Span::new(660, 690), "lunch".into())],
        );
        assert_eq!(day.classify(&slot(600, 30)), Occupancy::Booked);
        assert_eq!(
            day.classify(&slot(660, 30)),
            Occupancy::Blocked {
                reason: "lunch".into()
            }
        );
        assert_eq!(day.classify(&slot(630, 30)), Occupancy::Free);
    }

    #[test]
    fn test_classify_across_durations() {
        // a 45-minute booking at 09:45 touches the 09:30 and 10:00 half hours
        let day = DayOccupancy::new(vec![Span::new(585, 630)], vec![]);
        assert_eq!(day.classify(&slot(570, 30)), Occupancy::Booked);
        assert_eq!(day.classify(&slot(600, 30)), Occupancy::Booked);
        assert_eq!(day.classify(&slot(540, 30)), Occupancy::Free);
        assert_eq!(day.classify(&slot(630, 30)), Occupancy::Free);
    }

    async fn fixtures() -> (OccupancyIndex, BlockRegistry, BookingLedger) {
        let pool = memory_pool().await;
        let generator = Arc::new(SlotGenerator::new(test_rules()));
        (
            OccupancyIndex::new(pool.clone(), generator.clone()),
            BlockRegistry::new(pool.clone(), generator.clone()),
            BookingLedger::new(pool, generator, BookingPolicy::default()),
        )
    }

    #[tokio::test]
    async fn test_weekend_annotation_is_empty() {
        let (index, _, _) = fixtures().await;
        assert!(index.annotate(saturday(), 30).await.unwrap().is_empty());
        assert!(index.annotate(saturday(), 45).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_annotate_reflects_bookings_and_blocks() {
        let (index, registry, ledger) = fixtures().await;
        ledger
            .create(draft(slot(600, 30), PaymentStatus::Pending), BookingOrigin::Customer)
            .await
            .unwrap();
        registry
            .block(&["02.03.2026-11:30-30".to_string()], "Mittag")
            .await
            .unwrap();

        let slots = index.annotate(monday(), 30).await.unwrap();
        let kinds: Vec<&str> = slots.iter().map(|s| s.occupancy.as_str()).collect();
        assert_eq!(kinds, vec!["free", "free", "booked", "free", "free", "blocked"]);
        assert_eq!(
            slots[5].occupancy,
            Occupancy::Blocked {
                reason: "Mittag".into()
            }
        );
    }

    #[tokio::test]
    async fn test_range_covers_every_day() {
        let (index, _, ledger) = fixtures().await;
        ledger
            .create(draft(slot(540, 45), PaymentStatus::Completed), BookingOrigin::Customer)
            .await
            .unwrap();

        // Monday through Sunday
        let sunday = monday() + chrono::Duration::days(6);
        let days = index.annotate_range(monday(), sunday, 45).await.unwrap();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0].1[0].occupancy, Occupancy::Booked);
        assert!(days[1].1.iter().all(|s| s.is_available()));
        assert!(days[5].1.is_empty());
        assert!(days[6].1.is_empty());
    }

    #[tokio::test]
    async fn test_range_validation() {
        let (index, _, _) = fixtures().await;
        let earlier = monday() - chrono::Duration::days(1);
        assert!(matches!(
            index.annotate_range(monday(), earlier, 30).await,
            Err(ScheduleError::InvalidRequest(_))
        ));
        let far = monday() + chrono::Duration::days(MAX_RANGE_DAYS);
        assert!(matches!(
            index.annotate_range(monday(), far, 30).await,
            Err(ScheduleError::InvalidRequest(_))
        ));
        assert!(matches!(
            index.annotate_range(monday(), monday(), 50).await,
            Err(ScheduleError::InvalidDuration(50))
        ));
    }
}
