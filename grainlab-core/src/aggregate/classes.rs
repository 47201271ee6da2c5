//! Class-level rollups for commodity families (wheat by default).
//!
//! Groups every family commodity's records for a week by (class, region).
//! Records with no class are left out; records with no region fall into
//! the `UNKNOWN` region.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{AggregationEngine, QualityAccumulator, UnitTally};
use crate::config::normalize_key;
use crate::domain::{ClassExports, ClassKey};
use crate::error::{AggregationError, KeyError};

pub const UNKNOWN_REGION: &str = "UNKNOWN";

#[derive(Default)]
struct ClassBucket {
    pounds: f64,
    certificates: usize,
    quality: QualityAccumulator,
}

impl AggregationEngine {
    /// Compute and upsert class rollups for every family commodity in `week`.
    pub fn aggregate_classes(&self, week: NaiveDate) -> Result<UnitTally, AggregationError> {
        let commodities: Vec<String> = self
            .raw
            .distinct_commodities(week)?
            .into_iter()
            .filter(|c| self.config.in_class_family(c))
            .collect();

        let mut tally = UnitTally::default();
        let mut buckets: BTreeMap<(String, String), ClassBucket> = BTreeMap::new();
        let mut classless = 0usize;
        for commodity in &commodities {
            let valid = self.load_valid(commodity, week)?;
            for record in valid.records {
                let Some(class) = record.class.as_deref().map(normalize_key) else {
                    classless += 1;
                    continue;
                };
                let region = record
                    .destination_region
                    .as_deref()
                    .map(normalize_key)
                    .unwrap_or_else(|| UNKNOWN_REGION.to_string());
                let bucket = buckets.entry((class, region)).or_default();
                bucket.pounds += record.pounds;
                bucket.certificates += 1;
                bucket.quality.push(&record.quality);
            }
        }
        if classless > 0 {
            debug!(week = %week, classless, "records without a class left out of class rollup");
        }

        for ((class, region), bucket) in buckets {
            let key = ClassKey {
                week_ending: week,
                class,
                region,
            };
            if !bucket.pounds.is_finite() {
                let e = KeyError {
                    view: "class_exports",
                    key: format!("{} {} {}", key.week_ending, key.class, key.region),
                    reason: format!("non-finite pounds {}", bucket.pounds),
                };
                warn!(error = %e, "class rollup skipped");
                tally.keys_failed += 1;
                continue;
            }
            let mut row = self
                .summaries
                .get_class_exports(&key)?
                .unwrap_or_else(|| ClassExports::new(&key));
            row.pounds = bucket.pounds;
            row.certificate_count = bucket.certificates;
            row.quality_averages = bucket.quality.averages();
            self.summaries.upsert_class_exports(row)?;
            tally.rows_written += 1;
        }
        Ok(tally)
    }
}
