//! Trailing-window statistics over daily series.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use super::{AggregationEngine, UnitTally};
use crate::domain::{RollingKey, RollingStat};
use crate::error::AggregationError;

/// First day of the trailing window ending on `as_of` (inclusive).
pub fn window_start(as_of: NaiveDate, window_days: u32) -> NaiveDate {
    as_of - Duration::days(i64::from(window_days.max(1)) - 1)
}

impl AggregationEngine {
    /// Compute and upsert the trailing-window row for `series` as of a date.
    ///
    /// `day_count` records how many distinct days actually had data, so a
    /// short window stays visible instead of being silently averaged.
    pub fn aggregate_rolling(
        &self,
        series: &str,
        as_of: NaiveDate,
    ) -> Result<UnitTally, AggregationError> {
        let window_days = self.config.rolling_window_days;
        let start = window_start(as_of, window_days);
        let observations = self.raw.daily_observations(series, start, as_of)?;

        let mut tally = UnitTally::default();
        let mut days = BTreeSet::new();
        let mut sum = 0.0;
        for obs in &observations {
            if !obs.value.is_finite() {
                tally.records_skipped += 1;
                continue;
            }
            days.insert(obs.date);
            sum += obs.value;
        }
        if days.is_empty() {
            debug!(series, as_of = %as_of, "no observations in window");
            return Ok(tally);
        }

        let key = RollingKey {
            series: series.to_string(),
            as_of,
        };
        let day_count = days.len() as u32;
        let mut row = self
            .summaries
            .get_rolling(&key)?
            .unwrap_or_else(|| RollingStat::new(&key, window_days));
        row.window_days = window_days;
        row.day_count = day_count;
        row.sum = sum;
        row.mean = sum / f64::from(day_count);
        self.summaries.upsert_rolling(row)?;
        tally.rows_written = 1;

        if day_count < window_days {
            debug!(series, as_of = %as_of, day_count, window_days, "window has missing days");
        }
        Ok(tally)
    }
}
