//! Aggregation engine: derives every gold row for one (week, commodity).
//!
//! Write paths all follow the same shape: look the row up by its natural
//! key, start from an empty row if absent, set every field, upsert. Running
//! a pass twice over the same silver snapshot therefore leaves the gold
//! layer exactly as one pass would.
//!
//! Failure scopes:
//! - an invalid record is skipped; only the summary pass counts it in
//!   `UnitTally::records_skipped`, since the other passes re-read the same
//!   records
//! - a failed key (one destination, class or quality row) is logged and
//!   counted in `UnitTally::keys_failed`; siblings still get written
//! - a store error aborts the call and propagates to the scheduler

mod classes;
mod commodity;
mod destinations;
mod quality;
mod rolling;
pub mod stats;

use std::ops::AddAssign;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::MarketingYearResolver;
use crate::config::PipelineConfig;
use crate::domain::{validate_record, RawRecord};
use crate::error::StoreError;
use crate::store::{RawRecordStore, SummaryStore};

pub use stats::{FieldAccumulator, QualityAccumulator};

/// Counters returned by every engine operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTally {
    pub rows_written: usize,
    pub records_skipped: usize,
    pub keys_failed: usize,
}

impl AddAssign for UnitTally {
    fn add_assign(&mut self, other: Self) {
        self.rows_written += other.rows_written;
        self.records_skipped += other.records_skipped;
        self.keys_failed += other.keys_failed;
    }
}

/// Valid records for a key plus how many were rejected.
struct ValidRecords {
    records: Vec<RawRecord>,
    skipped: usize,
}

/// Computes and upserts gold rows. Cheap to share behind an `Arc`.
pub struct AggregationEngine {
    config: Arc<PipelineConfig>,
    resolver: MarketingYearResolver,
    raw: Arc<dyn RawRecordStore>,
    summaries: Arc<dyn SummaryStore>,
}

impl AggregationEngine {
    pub fn new(
        config: Arc<PipelineConfig>,
        raw: Arc<dyn RawRecordStore>,
        summaries: Arc<dyn SummaryStore>,
    ) -> Self {
        let resolver = MarketingYearResolver::new(&config);
        Self {
            config,
            resolver,
            raw,
            summaries,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &MarketingYearResolver {
        &self.resolver
    }

    pub fn raw(&self) -> &dyn RawRecordStore {
        self.raw.as_ref()
    }

    pub fn summaries(&self) -> &dyn SummaryStore {
        self.summaries.as_ref()
    }

    /// Read a key's silver records and drop the invalid ones.
    fn load_valid(&self, commodity: &str, week: NaiveDate) -> Result<ValidRecords, StoreError> {
        let mut records = self.raw.records_for(commodity, week)?;
        let before = records.len();
        records.retain(|r| match validate_record(r) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "skipping invalid record");
                false
            }
        });
        Ok(ValidRecords {
            skipped: before - records.len(),
            records,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;

    #[test]
    fn tally_adds_fieldwise() {
        let mut a = super::UnitTally {
            rows_written: 1,
            records_skipped: 2,
            keys_failed: 0,
        };
        a += super::UnitTally {
            rows_written: 3,
            records_skipped: 0,
            keys_failed: 1,
        };
        assert_eq!(a.rows_written, 4);
        assert_eq!(a.records_skipped, 2);
        assert_eq!(a.keys_failed, 1);
    }

    #[test]
    fn load_valid_counts_rejects() {
        let week = date(2024, 9, 5);
        let (_store, engine) = engine_with(vec![
            record("1", "CORN", week, "JAPAN", 10.0),
            record("2", "CORN", week, "JAPAN", -10.0),
            record("3", "CORN", week, "", 10.0),
        ]);
        let valid = engine.load_valid("CORN", week).unwrap();
        assert_eq!(valid.records.len(), 1);
        assert_eq!(valid.skipped, 2);
    }
}
