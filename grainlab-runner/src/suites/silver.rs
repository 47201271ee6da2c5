//! Silver checks: normalized records match their bronze payloads, keys are
//! unique, and values are physically plausible.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use grainlab_core::adapter::parse_payload;
use grainlab_core::config::ValueRanges;
use grainlab_core::domain::{QualityField, RawRecord};

use crate::check::{
    within_relative, CheckError, CheckResult, ConsistencyCheck, Layer, VerificationContext,
};
use crate::sampling::sample;

// ─── Transformation accuracy ─────────────────────────────────────────

/// Sampled bronze payloads, re-parsed, equal their silver rows.
pub struct TransformationAccuracy {
    ctx: Arc<VerificationContext>,
}

impl TransformationAccuracy {
    pub const NAME: &'static str = "silver_transformation_accuracy";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

/// Field-by-field differences between two records, empty when they agree.
fn differences(expected: &RawRecord, actual: &RawRecord, tolerance: f64) -> Vec<String> {
    let mut diffs = Vec::new();
    if expected.commodity != actual.commodity {
        diffs.push(format!("commodity {} != {}", actual.commodity, expected.commodity));
    }
    if expected.week_ending != actual.week_ending {
        diffs.push(format!("week_ending {} != {}", actual.week_ending, expected.week_ending));
    }
    if expected.destination_country != actual.destination_country {
        diffs.push(format!(
            "destination_country {} != {}",
            actual.destination_country, expected.destination_country
        ));
    }
    let routing = [
        ("destination_region", &expected.destination_region, &actual.destination_region),
        ("port", &expected.port, &actual.port),
        ("class", &expected.class, &actual.class),
    ];
    for (field, want, got) in routing {
        if want != got {
            diffs.push(format!("{field} {got:?} != {want:?}"));
        }
    }
    if !within_relative(actual.pounds, expected.pounds, tolerance) {
        diffs.push(format!("pounds {} != {}", actual.pounds, expected.pounds));
    }
    for field in QualityField::ALL {
        let (want, got) = (expected.quality.get(field), actual.quality.get(field));
        let same = match (want, got) {
            (Some(w), Some(g)) => within_relative(g, w, tolerance),
            (None, None) => true,
            _ => false,
        };
        if !same {
            diffs.push(format!("{} {got:?} != {want:?}", field.as_str()));
        }
    }
    diffs
}

impl ConsistencyCheck for TransformationAccuracy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Silver
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Silver);
        let verification = &self.ctx.config.verification;
        let tolerance = self.ctx.config.tolerances.reconciliation_rel;

        let silver: HashMap<String, RawRecord> = self
            .ctx
            .raw
            .all_records()?
            .into_iter()
            .map(|r| (r.certificate_id.clone(), r))
            .collect();
        let bronze = self.ctx.raw.bronze_records()?;

        let sampled = sample(
            &bronze,
            verification.sample_size,
            verification.sample_seed,
            Self::NAME,
        );
        for payload in sampled {
            let expected = match parse_payload(payload) {
                Ok(r) => r,
                Err(e) => {
                    // Unparseable payloads are the structure check's concern.
                    result.warn(format!("skipped unparseable payload: {e}"));
                    continue;
                }
            };
            let Some(actual) = silver.get(&expected.certificate_id) else {
                result.record_failure(format!(
                    "certificate {} has no silver row",
                    expected.certificate_id
                ));
                continue;
            };
            let diffs = differences(&expected, actual, tolerance);
            if diffs.is_empty() {
                result.record_pass();
            } else {
                result.record_failure(format!(
                    "certificate {}: {}",
                    expected.certificate_id,
                    diffs.join("; ")
                ));
            }
        }
        Ok(result.finish_with_max_failure_rate(self.ctx.config.tolerances.max_malformed_rate))
    }
}

// ─── Duplicate keys ──────────────────────────────────────────────────

/// Certificate ids are unique in the silver layer.
pub struct DuplicateKeys {
    ctx: Arc<VerificationContext>,
}

impl DuplicateKeys {
    pub const NAME: &'static str = "silver_duplicate_keys";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for DuplicateKeys {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Silver
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Silver);
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in self.ctx.raw.all_records()? {
            *counts.entry(record.certificate_id).or_default() += 1;
        }
        for (id, count) in counts {
            if count == 1 {
                result.record_pass();
            } else {
                result.record_failure(format!("certificate {id} appears {count} times"));
            }
        }
        Ok(result.finish_zero_tolerance())
    }
}

// ─── Value ranges ────────────────────────────────────────────────────

/// Pounds and quality values fall inside configured physical bounds.
pub struct ValueRangeCheck {
    ctx: Arc<VerificationContext>,
}

impl ValueRangeCheck {
    pub const NAME: &'static str = "silver_value_ranges";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

fn range_violations(record: &RawRecord, ranges: &ValueRanges) -> Vec<String> {
    let mut violations = Vec::new();
    if !(record.pounds.is_finite()
        && record.pounds >= 0.0
        && record.pounds <= ranges.max_certificate_pounds)
    {
        violations.push(format!("pounds {}", record.pounds));
    }
    for (field, value) in record.quality.present() {
        let range = match field {
            QualityField::TestWeight => &ranges.test_weight,
            QualityField::Moisture => &ranges.moisture,
            QualityField::Protein => &ranges.protein,
            QualityField::Dockage => &ranges.dockage,
            QualityField::ForeignMaterial => &ranges.foreign_material,
            QualityField::TotalDamage => &ranges.total_damage,
        };
        if !range.contains(value) {
            violations.push(format!(
                "{} {value} outside [{}, {}]",
                field.as_str(),
                range.min,
                range.max
            ));
        }
    }
    violations
}

impl ConsistencyCheck for ValueRangeCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Silver
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Silver);
        let ranges = &self.ctx.config.verification.ranges;
        for record in self.ctx.raw.all_records()? {
            let violations = range_violations(&record, ranges);
            if violations.is_empty() {
                result.record_pass();
            } else {
                result.record_failure(format!(
                    "certificate {}: {}",
                    record.certificate_id,
                    violations.join("; ")
                ));
            }
        }
        Ok(result.finish_with_max_failure_rate(
            self.ctx.config.tolerances.max_range_violation_rate,
        ))
    }
}
