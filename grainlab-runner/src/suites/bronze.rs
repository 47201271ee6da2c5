//! Bronze checks: raw ingestion is complete, fresh, parseable and faithful
//! to the original source.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use grainlab_core::adapter::{parse_payload, payload_week};
use grainlab_core::calendar::expected_weeks;

use crate::check::{
    within_relative, CheckError, CheckResult, ConsistencyCheck, Layer, VerificationContext,
};
use crate::sampling::sample;
use crate::source::SourceClient;

// ─── Completeness ────────────────────────────────────────────────────

/// Every week-ending date in the expected calendar has bronze data.
///
/// The calendar runs weekly from `verification.calendar_start` (or the
/// earliest observed week) through the last week ending on or before
/// `today`, or the latest observed week if that is later.
pub struct Completeness {
    ctx: Arc<VerificationContext>,
}

impl Completeness {
    pub const NAME: &'static str = "bronze_completeness";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for Completeness {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Bronze
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Bronze);
        let bronze = self.ctx.raw.bronze_records()?;
        let observed: BTreeSet<_> = bronze.iter().filter_map(payload_week).collect();

        let (Some(first_seen), Some(last)) = (observed.first(), observed.last()) else {
            result.record_failure("no bronze data with a readable week_ending");
            return Ok(result.finish_zero_tolerance());
        };
        let first = self
            .ctx
            .config
            .verification
            .calendar_start
            .unwrap_or(*first_seen);

        let elapsed_weeks = (self.ctx.today - first).num_days().max(0) / 7;
        let through_today = first + Duration::days(elapsed_weeks * 7);
        let end = (*last).max(through_today);

        for week in expected_weeks(first, end) {
            if observed.contains(&week) {
                result.record_pass();
            } else {
                result.record_failure(format!("no bronze data for week ending {week}"));
            }
        }
        let off_calendar = observed
            .iter()
            .filter(|w| **w >= first && (**w - first).num_days() % 7 != 0)
            .count();
        if off_calendar > 0 {
            result.warn(format!(
                "{off_calendar} observed week(s) do not fall on the expected weekday"
            ));
        }
        Ok(result.finish_zero_tolerance())
    }
}

// ─── Freshness ───────────────────────────────────────────────────────

/// The most recent ingestion is no older than the allowed staleness.
pub struct Freshness {
    ctx: Arc<VerificationContext>,
}

impl Freshness {
    pub const NAME: &'static str = "bronze_freshness";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for Freshness {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Bronze
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Bronze);
        let oldest_allowed =
            self.ctx.today - Duration::days(self.ctx.config.verification.max_staleness_days);
        match self.ctx.raw.latest_ingestion()? {
            Some(latest) if latest >= oldest_allowed => result.record_pass(),
            Some(latest) => result.record_failure(format!(
                "latest ingestion {latest} is older than {oldest_allowed}"
            )),
            None => result.record_failure("no bronze ingestion recorded"),
        }
        Ok(result.finish_zero_tolerance())
    }
}

// ─── Payload structure ───────────────────────────────────────────────

/// Semi-structured payloads map onto typed records.
pub struct PayloadStructure {
    ctx: Arc<VerificationContext>,
}

impl PayloadStructure {
    pub const NAME: &'static str = "bronze_payload_structure";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for PayloadStructure {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Bronze
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Bronze);
        let bronze = self.ctx.raw.bronze_records()?;
        if bronze.is_empty() {
            result.warn("no bronze payloads to inspect");
        }
        for record in &bronze {
            match parse_payload(record) {
                Ok(_) => result.record_pass(),
                Err(e) => result.record_failure(e.to_string()),
            }
        }
        Ok(result.finish_with_max_failure_rate(self.ctx.config.tolerances.max_malformed_rate))
    }
}

// ─── Source spot check ───────────────────────────────────────────────

/// Sampled certificates agree with the original source.
pub struct SourceSpotCheck {
    ctx: Arc<VerificationContext>,
    source: Arc<dyn SourceClient>,
}

impl SourceSpotCheck {
    pub const NAME: &'static str = "bronze_source_spot_check";

    pub fn new(ctx: Arc<VerificationContext>, source: Arc<dyn SourceClient>) -> Self {
        Self { ctx, source }
    }
}

impl ConsistencyCheck for SourceSpotCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Bronze
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Bronze);
        let verification = &self.ctx.config.verification;
        let tolerance = self.ctx.config.tolerances.reconciliation_rel;

        let parsed: Vec<_> = self
            .ctx
            .raw
            .bronze_records()?
            .iter()
            .filter_map(|b| parse_payload(b).ok())
            .collect();
        if parsed.is_empty() {
            result.warn("no parseable bronze records to sample");
        }

        let sampled = sample(
            &parsed,
            verification.sample_size,
            verification.sample_seed,
            Self::NAME,
        );
        for record in sampled {
            let id = &record.certificate_id;
            match self.source.fetch_pounds(id) {
                Ok(Some(pounds)) if within_relative(record.pounds, pounds, tolerance) => {
                    result.record_pass()
                }
                Ok(Some(pounds)) => result.record_failure(format!(
                    "certificate {id}: bronze has {} lb, source has {pounds} lb",
                    record.pounds
                )),
                Ok(None) => result.record_failure(format!("certificate {id}: not found at source")),
                Err(e) => result.record_failure(format!("certificate {id}: {e}")),
            }
        }
        Ok(result.finish_with_min_pass_rate(self.ctx.config.tolerances.min_source_agreement))
    }
}
