use chrono::{Datelike, NaiveDate, Weekday};

use super::slot::{Minute, SlotId};
use super::ScheduleError;

/// Provider working rules: daily window, days off, bookable durations.
#[derive(Debug, Clone)]
pub struct ScheduleRules {
    day_start: Minute,
    day_end: Minute,
    non_working_days: Vec<Weekday>,
    durations: Vec<Minute>,
    base_unit: Minute,
}

impl ScheduleRules {
    pub fn new(
        day_start: Minute,
        day_end: Minute,
        non_working_days: Vec<Weekday>,
        mut durations: Vec<Minute>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            day_start < day_end && day_end <= 24 * 60,
            "working day must start before it ends (got {day_start}..{day_end} minutes)"
        );
        anyhow::ensure!(!durations.is_empty(), "at least one slot duration is required");
        anyhow::ensure!(
            durations.iter().all(|d| *d > 0),
            "slot durations must be positive"
        );
        durations.sort_unstable();
        durations.dedup();

        let base_unit = durations.iter().copied().fold(0, gcd);

        Ok(Self {
            day_start,
            day_end,
            non_working_days,
            durations,
            base_unit,
        })
    }

    pub fn day_start(&self) -> Minute {
        self.day_start
    }

    pub fn day_end(&self) -> Minute {
        self.day_end
    }

    pub fn durations(&self) -> &[Minute] {
        &self.durations
    }

    /// Granularity of per-slot locking: the gcd of all supported durations.
    pub fn base_unit(&self) -> Minute {
        self.base_unit
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        !self.non_working_days.contains(&date.weekday())
    }
}

fn gcd(a: Minute, b: Minute) -> Minute {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Turns (date, duration) into the day's slot skeleton.
#[derive(Debug, Clone)]
pub struct SlotGenerator {
    rules: ScheduleRules,
}

impl SlotGenerator {
    pub fn new(rules: ScheduleRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ScheduleRules {
        &self.rules
    }

    pub fn check_duration(&self, duration: Minute) -> Result<(), ScheduleError> {
        if self.rules.durations.contains(&duration) {
            Ok(())
        } else {
            Err(ScheduleError::InvalidDuration(duration))
        }
    }

    /// Contiguous, non-overlapping `duration`-long slots from day start; a
    /// trailing slot that would run past day end is dropped. Non-working
    /// days yield an empty list.
    pub fn generate(&self, date: NaiveDate, duration: Minute) -> Result<Vec<SlotId>, ScheduleError> {
        self.check_duration(duration)?;
        if !self.rules.is_working_day(date) {
            return Ok(Vec::new());
        }

        let mut slots = Vec::new();
        let mut start = self.rules.day_start;
        while start + duration <= self.rules.day_end {
            slots.push(SlotId::new(date, start, duration));
            start += duration;
        }
        Ok(slots)
    }

    /// Check that a slot id names something bookable under the rules.
    pub fn validate(&self, slot: &SlotId) -> Result<(), ScheduleError> {
        self.check_duration(slot.duration)?;
        if !self.rules.is_working_day(slot.date)
            || slot.start < self.rules.day_start
            || slot.end() > self.rules.day_end
        {
            return Err(ScheduleError::OutsideWorkingHours(*slot));
        }
        if (slot.start - self.rules.day_start) % self.rules.base_unit != 0 {
            return Err(ScheduleError::InvalidSlotId(slot.to_string()));
        }
        Ok(())
    }

    /// Start minute of every base unit the slot covers.
    pub fn base_units(&self, slot: &SlotId) -> impl Iterator<Item = Minute> {
        (slot.start..slot.end()).step_by(self.rules.base_unit as usize)
    }
}
