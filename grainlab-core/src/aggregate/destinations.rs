//! Destination rollups by country, region and port-region.
//!
//! Records whose port has no configured port-region are left out of the
//! port-region rollup (and logged); they still count toward the country
//! rollup and the commodity summary. Reconciliation checks therefore hold
//! for the country dimension, not for port-regions.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{AggregationEngine, UnitTally};
use crate::config::normalize_key;
use crate::domain::{DestinationRollup, Dimension, RawRecord, RollupKey};
use crate::error::{AggregationError, KeyError};

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    pounds: f64,
    certificates: usize,
}

impl AggregationEngine {
    /// Compute and upsert every rollup row of `dimension` for `(commodity, week)`.
    pub fn aggregate_destinations(
        &self,
        week: NaiveDate,
        commodity: &str,
        dimension: Dimension,
    ) -> Result<UnitTally, AggregationError> {
        let commodity = normalize_key(commodity);
        let valid = self.load_valid(&commodity, week)?;
        let mut tally = UnitTally::default();
        if valid.records.is_empty() {
            return Ok(tally);
        }

        let week_total: f64 = valid.records.iter().map(|r| r.pounds).sum();
        let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();
        let mut unkeyed = 0usize;
        for record in &valid.records {
            match self.destination_of(record, dimension) {
                Some(destination) => {
                    let bucket = buckets.entry(destination).or_default();
                    bucket.pounds += record.pounds;
                    bucket.certificates += 1;
                }
                None => unkeyed += 1,
            }
        }
        if unkeyed > 0 {
            debug!(
                commodity = %commodity,
                week = %week,
                dimension = %dimension,
                unkeyed,
                "records without a destination key left out of rollup"
            );
        }

        for (destination, bucket) in buckets {
            let key = RollupKey {
                commodity: commodity.clone(),
                week_ending: week,
                dimension,
                destination,
            };
            match rollup_values(&key, bucket, week_total) {
                Ok((pounds, share_pct)) => {
                    let mut row = self
                        .summaries
                        .get_rollup(&key)?
                        .unwrap_or_else(|| DestinationRollup::new(&key));
                    row.pounds = pounds;
                    row.certificate_count = bucket.certificates;
                    row.share_pct = share_pct;
                    self.summaries.upsert_rollup(row)?;
                    tally.rows_written += 1;
                }
                Err(e) => {
                    warn!(error = %e, "destination rollup skipped");
                    tally.keys_failed += 1;
                }
            }
        }
        Ok(tally)
    }

    /// The rollup key a record contributes to, if any.
    fn destination_of(&self, record: &RawRecord, dimension: Dimension) -> Option<String> {
        match dimension {
            Dimension::Country => Some(normalize_key(&record.destination_country)),
            Dimension::Region => record
                .destination_region
                .as_deref()
                .map(normalize_key)
                .filter(|r| !r.is_empty()),
            Dimension::Port => record
                .port
                .as_deref()
                .and_then(|p| self.config.port_region(p))
                .map(str::to_string),
        }
    }
}

fn rollup_values(key: &RollupKey, bucket: Bucket, week_total: f64) -> Result<(f64, f64), KeyError> {
    if !bucket.pounds.is_finite() {
        return Err(KeyError {
            view: key.dimension.view_name(),
            key: format!("{} {} {}", key.commodity, key.week_ending, key.destination),
            reason: format!("non-finite pounds {}", bucket.pounds),
        });
    }
    let share_pct = if week_total > 0.0 {
        bucket.pounds / week_total * 100.0
    } else {
        0.0
    };
    Ok((bucket.pounds, share_pct))
}
