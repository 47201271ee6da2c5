//! Null-safe accumulators for quality statistics.
//!
//! Absent values never reach an accumulator, so an average is taken over
//! the records that reported the field, not over all records. An accumulator
//! that saw nothing yields `None` rather than a row of zeros.

use std::collections::BTreeMap;

use crate::domain::{FieldStats, QualityField, QualityFields};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldAccumulator {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl FieldAccumulator {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn finish(&self) -> Option<FieldStats> {
        let avg = self.mean()?;
        Some(FieldStats {
            count: self.count,
            sum: self.sum,
            avg,
            min: self.min,
            max: self.max,
        })
    }
}

/// Per-field accumulators over a set of records.
#[derive(Debug, Clone, Default)]
pub struct QualityAccumulator {
    fields: BTreeMap<QualityField, FieldAccumulator>,
    records: usize,
}

impl QualityAccumulator {
    /// Fold one record's populated quality values in.
    pub fn push(&mut self, quality: &QualityFields) {
        let mut any = false;
        for (field, value) in quality.present() {
            self.fields.entry(field).or_default().push(value);
            any = true;
        }
        if any {
            self.records += 1;
        }
    }

    /// No populated value was seen.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Records that contributed at least one value.
    pub fn record_count(&self) -> usize {
        self.records
    }

    pub fn stats(&self) -> BTreeMap<QualityField, FieldStats> {
        self.fields
            .iter()
            .filter_map(|(f, acc)| acc.finish().map(|s| (*f, s)))
            .collect()
    }

    pub fn averages(&self) -> BTreeMap<QualityField, f64> {
        self.fields
            .iter()
            .filter_map(|(f, acc)| acc.mean().map(|m| (*f, m)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_accumulator_has_no_stats() {
        let acc = FieldAccumulator::default();
        assert_eq!(acc.finish(), None);
        assert_eq!(acc.mean(), None);
    }

    #[test]
    fn tracks_min_max_and_mean() {
        let mut acc = FieldAccumulator::default();
        for v in [12.0, 10.0, 14.0] {
            acc.push(v);
        }
        let stats = acc.finish().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 14.0);
        assert_eq!(stats.avg, 12.0);
    }

    #[test]
    fn negative_first_value_sets_min_and_max() {
        let mut acc = FieldAccumulator::default();
        acc.push(-3.0);
        let stats = acc.finish().unwrap();
        assert_eq!(stats.min, -3.0);
        assert_eq!(stats.max, -3.0);
    }

    #[test]
    fn absent_fields_are_excluded_from_averages() {
        let mut acc = QualityAccumulator::default();
        acc.push(&QualityFields {
            protein: Some(12.0),
            moisture: Some(13.0),
            ..Default::default()
        });
        acc.push(&QualityFields {
            protein: Some(14.0),
            ..Default::default()
        });
        acc.push(&QualityFields::default());

        let avgs = acc.averages();
        assert_eq!(avgs[&QualityField::Protein], 13.0);
        // Only one record reported moisture; it is not diluted by the others.
        assert_eq!(avgs[&QualityField::Moisture], 13.0);
        assert!(!avgs.contains_key(&QualityField::Dockage));
        assert_eq!(acc.record_count(), 2);
    }

    #[test]
    fn all_empty_records_leave_accumulator_empty() {
        let mut acc = QualityAccumulator::default();
        acc.push(&QualityFields::default());
        assert!(acc.is_empty());
        assert!(acc.stats().is_empty());
    }
}
