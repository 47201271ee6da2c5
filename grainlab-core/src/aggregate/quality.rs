//! Quality statistics per (week, commodity), overall and by region.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{AggregationEngine, QualityAccumulator, UnitTally};
use crate::config::normalize_key;
use crate::domain::{FieldStats, QualityField, QualityKey, QualityStats};
use crate::error::{AggregationError, KeyError};

impl AggregationEngine {
    /// Compute and upsert the overall quality row plus one row per region.
    ///
    /// A week with no populated quality value writes nothing.
    pub fn aggregate_quality(
        &self,
        week: NaiveDate,
        commodity: &str,
    ) -> Result<UnitTally, AggregationError> {
        let commodity = normalize_key(commodity);
        let valid = self.load_valid(&commodity, week)?;
        let mut tally = UnitTally::default();

        let mut overall = QualityAccumulator::default();
        let mut by_region: BTreeMap<String, QualityAccumulator> = BTreeMap::new();
        for record in &valid.records {
            overall.push(&record.quality);
            if let Some(region) = record.destination_region.as_deref() {
                by_region
                    .entry(normalize_key(region))
                    .or_default()
                    .push(&record.quality);
            }
        }
        if overall.is_empty() {
            debug!(commodity = %commodity, week = %week, "no quality values reported");
            return Ok(tally);
        }

        let groups = std::iter::once((None, overall))
            .chain(by_region.into_iter().map(|(r, acc)| (Some(r), acc)))
            .filter(|(_, acc)| !acc.is_empty());

        for (region, acc) in groups {
            let key = QualityKey {
                week_ending: week,
                commodity: commodity.clone(),
                region,
            };
            match finite_stats(&key, acc.stats()) {
                Ok(fields) => {
                    let mut row = self
                        .summaries
                        .get_quality(&key)?
                        .unwrap_or_else(|| QualityStats::new(&key));
                    row.record_count = acc.record_count();
                    row.fields = fields;
                    self.summaries.upsert_quality(row)?;
                    tally.rows_written += 1;
                }
                Err(e) => {
                    warn!(error = %e, "quality row skipped");
                    tally.keys_failed += 1;
                }
            }
        }
        Ok(tally)
    }
}

fn finite_stats(
    key: &QualityKey,
    fields: BTreeMap<QualityField, FieldStats>,
) -> Result<BTreeMap<QualityField, FieldStats>, KeyError> {
    let bad = fields
        .iter()
        .find(|(_, s)| ![s.sum, s.avg, s.min, s.max].iter().all(|v| v.is_finite()));
    if let Some((field, stats)) = bad {
        return Err(KeyError {
            view: "quality_stats",
            key: format!(
                "{} {} {}",
                key.commodity,
                key.week_ending,
                key.region.as_deref().unwrap_or("ALL")
            ),
            reason: format!("non-finite {} statistics (sum {})", field.as_str(), stats.sum),
        });
    }
    Ok(fields)
}
