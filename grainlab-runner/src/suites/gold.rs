//! Gold checks: derived rows reconcile with silver, every expected view and
//! rollup key exists, and stored statistics survive independent recomputation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use grainlab_core::calendar::{pct_change, prior_week};
use grainlab_core::config::normalize_key;
use grainlab_core::domain::{validate_record, Dimension};

use crate::check::{
    within_relative, CheckError, CheckResult, ConsistencyCheck, Layer, VerificationContext,
};

// ─── Total reconciliation ────────────────────────────────────────────

/// Summary totals equal silver totals, and rollups add back up to them.
pub struct TotalReconciliation {
    ctx: Arc<VerificationContext>,
}

impl TotalReconciliation {
    pub const NAME: &'static str = "gold_total_reconciliation";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for TotalReconciliation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Gold
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Gold);
        let tolerance = self.ctx.config.tolerances.reconciliation_rel;

        let mut silver: BTreeMap<(String, NaiveDate), f64> = BTreeMap::new();
        for record in self.ctx.raw.all_records()? {
            if validate_record(&record).is_ok() {
                *silver
                    .entry((normalize_key(&record.commodity), record.week_ending))
                    .or_default() += record.pounds;
            }
        }

        for summary in self.ctx.summaries.all_summaries()? {
            let (commodity, week) = (summary.commodity.as_str(), summary.week_ending);
            let mut problems = Vec::new();

            let silver_total = silver
                .remove(&(commodity.to_string(), week))
                .unwrap_or_default();
            if !within_relative(summary.total_pounds, silver_total, tolerance) {
                problems.push(format!(
                    "summary {} lb vs silver {silver_total} lb",
                    summary.total_pounds
                ));
            }

            let country: f64 = self
                .ctx
                .summaries
                .rollups_for(commodity, week, Dimension::Country)?
                .iter()
                .map(|r| r.pounds)
                .sum();
            if !within_relative(country, summary.total_pounds, tolerance) {
                problems.push(format!(
                    "country rollups {country} lb vs summary {} lb",
                    summary.total_pounds
                ));
            }

            // Regions are optional per record, so they may fall short but never exceed.
            let region: f64 = self
                .ctx
                .summaries
                .rollups_for(commodity, week, Dimension::Region)?
                .iter()
                .map(|r| r.pounds)
                .sum();
            if region > summary.total_pounds * (1.0 + tolerance) {
                problems.push(format!(
                    "region rollups {region} lb exceed summary {} lb",
                    summary.total_pounds
                ));
            }

            if problems.is_empty() {
                result.record_pass();
            } else {
                result.record_failure(format!("{commodity} {week}: {}", problems.join("; ")));
            }
        }

        for ((commodity, week), pounds) in silver {
            result.record_failure(format!(
                "{commodity} {week}: silver has {pounds} lb but no summary row"
            ));
        }
        Ok(result.finish_zero_tolerance())
    }
}

// ─── Materialized views ──────────────────────────────────────────────

pub struct MaterializedViews {
    ctx: Arc<VerificationContext>,
}

impl MaterializedViews {
    pub const NAME: &'static str = "gold_materialized_views";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for MaterializedViews {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Gold
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Gold);
        let existing: BTreeSet<String> =
            self.ctx.summaries.materialized_views()?.into_iter().collect();
        for view in &self.ctx.config.verification.required_views {
            if existing.contains(view) {
                result.record_pass();
            } else {
                result.record_failure(format!("view {view} does not exist"));
            }
        }
        Ok(result.finish_zero_tolerance())
    }
}

// ─── Rolling recompute ───────────────────────────────────────────────

/// Stored trailing-window statistics equal a recomputation from silver
/// daily rows, and every window is complete.
///
/// Windows that reach back before a series' first observation only expect
/// the days since that observation.
pub struct RollingRecompute {
    ctx: Arc<VerificationContext>,
}

impl RollingRecompute {
    pub const NAME: &'static str = "gold_rolling_recompute";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for RollingRecompute {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Gold
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Gold);
        let window = self.ctx.config.rolling_window_days.max(1);
        let tolerance = self.ctx.config.tolerances.rolling_abs;

        let rows = self.ctx.summaries.all_rolling()?;
        if rows.is_empty() {
            result.warn("no rolling statistics materialized");
        }

        let mut first_seen: BTreeMap<String, Option<NaiveDate>> = BTreeMap::new();
        for row in rows {
            let label = format!("{} as of {}", row.series, row.as_of);
            if row.window_days != window {
                result.warn(format!(
                    "{label}: stored window {} days, configured {window}",
                    row.window_days
                ));
            }

            let start = row.as_of - Duration::days(i64::from(window) - 1);
            let mut days = BTreeSet::new();
            let mut sum = 0.0;
            for obs in self.ctx.raw.daily_observations(&row.series, start, row.as_of)? {
                if obs.value.is_finite() {
                    days.insert(obs.date);
                    sum += obs.value;
                }
            }

            let first = match first_seen.get(&row.series).copied() {
                Some(first) => first,
                None => {
                    let first = self
                        .ctx
                        .raw
                        .daily_observations(&row.series, NaiveDate::MIN, NaiveDate::MAX)?
                        .first()
                        .map(|o| o.date);
                    first_seen.insert(row.series.clone(), first);
                    first
                }
            };
            let expected = match first {
                Some(first) if first > start => (row.as_of - first).num_days().max(0) as usize + 1,
                _ => window as usize,
            };

            if days.len() != expected {
                result.record_failure(format!(
                    "day-count mismatch for {label}: expected {expected} days, found {}",
                    days.len()
                ));
                continue;
            }
            if days.is_empty() {
                result.record_failure(format!("{label}: no silver observations in window"));
                continue;
            }
            if row.day_count as usize != days.len() {
                result.warn(format!(
                    "{label}: stored day_count {}, recomputed {}",
                    row.day_count,
                    days.len()
                ));
            }
            let mean = sum / days.len() as f64;
            if (sum - row.sum).abs() > tolerance {
                result.record_failure(format!(
                    "sum mismatch for {label}: stored {}, recomputed {sum}",
                    row.sum
                ));
            } else if (mean - row.mean).abs() > tolerance {
                result.record_failure(format!(
                    "mean mismatch for {label}: stored {}, recomputed {mean}",
                    row.mean
                ));
            } else {
                result.record_pass();
            }
        }
        Ok(result.finish_zero_tolerance())
    }
}

// ─── Dimension coverage ──────────────────────────────────────────────

/// Every destination observed in silver has a rollup row.
///
/// Ports without a configured port-region are excluded from the port view
/// by policy; they are reported as a warning, not a failure.
pub struct DimensionCoverage {
    ctx: Arc<VerificationContext>,
}

impl DimensionCoverage {
    pub const NAME: &'static str = "gold_dimension_coverage";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for DimensionCoverage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Gold
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Gold);
        let mut unmapped_ports = BTreeSet::new();

        for summary in self.ctx.summaries.all_summaries()? {
            let (commodity, week) = (summary.commodity.as_str(), summary.week_ending);
            for dimension in Dimension::ALL {
                let present: BTreeSet<String> = self
                    .ctx
                    .summaries
                    .rollups_for(commodity, week, dimension)?
                    .into_iter()
                    .map(|r| r.destination)
                    .collect();

                let observed = self.ctx.raw.distinct_destinations(commodity, week, dimension)?;
                let expected: BTreeSet<String> = match dimension {
                    Dimension::Port => observed
                        .into_iter()
                        .filter_map(|port| match self.ctx.config.port_region(&port) {
                            Some(region) => Some(region.to_string()),
                            None => {
                                unmapped_ports.insert(port);
                                None
                            }
                        })
                        .collect(),
                    _ => observed.into_iter().collect(),
                };

                for key in expected {
                    if present.contains(&key) {
                        result.record_pass();
                    } else {
                        result.record_failure(format!(
                            "{commodity} {week}: no {} rollup for {key}",
                            dimension.view_name()
                        ));
                    }
                }
            }
        }

        if !unmapped_ports.is_empty() {
            let ports: Vec<_> = unmapped_ports.into_iter().collect();
            result.warn(format!(
                "ports without a port-region (excluded by policy): {}",
                ports.join(", ")
            ));
        }
        Ok(result.finish_zero_tolerance())
    }
}

// ─── Marketing-year-to-date recurrence ───────────────────────────────

/// `my_to_date(n) = my_to_date(n-1) + total(n)` within each marketing year,
/// and each row's marketing year matches the configured calendar.
pub struct MyToDateRecurrence {
    ctx: Arc<VerificationContext>,
}

impl MyToDateRecurrence {
    pub const NAME: &'static str = "gold_my_to_date_recurrence";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for MyToDateRecurrence {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Gold
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Gold);
        let resolver = self.ctx.resolver();
        let tolerance = self.ctx.config.tolerances.reconciliation_rel;

        let mut rows = self.ctx.summaries.all_summaries()?;
        rows.sort_by(|a, b| (&a.commodity, a.week_ending).cmp(&(&b.commodity, b.week_ending)));

        // (commodity, marketing year, running total)
        let mut running: Option<(String, i32, f64)> = None;
        for row in rows {
            let label = format!("{} {}", row.commodity, row.week_ending);
            let year = match resolver.get_marketing_year(&row.commodity, row.week_ending) {
                Ok(year) => year,
                Err(e) => {
                    result.record_failure(format!("{label}: {e}"));
                    continue;
                }
            };
            if year != row.marketing_year {
                result.record_failure(format!(
                    "{label}: stored marketing year {}, calendar says {year}",
                    row.marketing_year
                ));
                continue;
            }

            let expected = match &running {
                Some((c, y, total)) if *c == row.commodity && *y == year => {
                    total + row.total_pounds
                }
                _ => row.total_pounds,
            };
            running = Some((row.commodity.clone(), year, expected));

            if within_relative(row.my_to_date_pounds, expected, tolerance) {
                result.record_pass();
            } else {
                result.record_failure(format!(
                    "{label}: my_to_date {} lb, running total {expected} lb",
                    row.my_to_date_pounds
                ));
            }
        }
        Ok(result.finish_zero_tolerance())
    }
}

// ─── Alert thresholds ────────────────────────────────────────────────

/// Stored alert flags equal flags recomputed from persisted week totals.
pub struct AlertThresholds {
    ctx: Arc<VerificationContext>,
}

impl AlertThresholds {
    pub const NAME: &'static str = "gold_alert_thresholds";

    pub fn new(ctx: Arc<VerificationContext>) -> Self {
        Self { ctx }
    }
}

impl ConsistencyCheck for AlertThresholds {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn layer(&self) -> Layer {
        Layer::Gold
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        let mut result = CheckResult::new(Self::NAME, Layer::Gold);
        let threshold = self.ctx.config.alert_threshold_pct;

        let rows = self.ctx.summaries.all_summaries()?;
        let totals: BTreeMap<(&str, NaiveDate), f64> = rows
            .iter()
            .map(|r| ((r.commodity.as_str(), r.week_ending), r.total_pounds))
            .collect();

        for row in &rows {
            let prior = totals
                .get(&(row.commodity.as_str(), prior_week(row.week_ending)))
                .copied();
            let wow = pct_change(prior, row.total_pounds);
            let expected = wow.is_some_and(|pct| pct.abs() >= threshold);
            if row.alert == expected {
                result.record_pass();
            } else {
                result.record_failure(format!(
                    "{} {}: alert flag {}, expected {expected} (week-over-week {})",
                    row.commodity,
                    row.week_ending,
                    row.alert,
                    wow.map_or_else(|| "n/a".to_string(), |p| format!("{p:.2}%"))
                ));
            }
        }
        Ok(result.finish_zero_tolerance())
    }
}
