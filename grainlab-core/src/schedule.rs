//! Period scheduler: decides which (week, commodity) units to aggregate and
//! in what order.
//!
//! Ordering rules:
//! - weeks of one commodity run in ascending order, because a week's
//!   marketing-year-to-date reads the earlier weeks' persisted summaries
//! - different commodities have no ordering dependency and run in parallel
//! - within a unit the summary runs first, then destinations and quality
//!   run concurrently
//!
//! Every pass over a key holds that key's lock from `KeyLocks` for its whole
//! duration, so two passes never interleave their read-then-write on the
//! same rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{AggregationEngine, UnitTally};
use crate::config::normalize_key;
use crate::domain::Dimension;
use crate::error::{AggregationError, StoreError};

/// Lock key used for the week-wide class rollup.
const CLASSES_LOCK: &str = "*CLASSES*";

// ─── Cancellation ────────────────────────────────────────────────────

/// Cooperative stop signal: an explicit flag plus an optional deadline.
///
/// Checked before each unit starts. Units already running finish.
#[derive(Debug, Default)]
pub struct Cancellation {
    flag: AtomicBool,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips automatically once `timeout` has elapsed from now.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            flag: AtomicBool::new(false),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

// ─── Per-key locks ───────────────────────────────────────────────────

/// One mutex per (key, week), created on first use.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<(String, NaiveDate), Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str, week: NaiveDate) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry((normalize_key(key), week))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the lock for `(key, week)`.
    ///
    /// A lock poisoned by a panicking pass is recovered: the rows it guards
    /// are rewritten in full by the next pass anyway.
    pub fn with_lock<T>(&self, key: &str, week: NaiveDate, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key, week);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Number of distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Reports ─────────────────────────────────────────────────────────

/// What a scheduling unit covered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum UnitScope {
    Commodity(String),
    Classes,
    Rolling(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded { tally: UnitTally },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub scope: UnitScope,
    pub week: NaiveDate,
    pub status: UnitStatus,
}

impl UnitReport {
    fn from_result(
        scope: UnitScope,
        week: NaiveDate,
        result: Result<UnitTally, AggregationError>,
    ) -> Self {
        let status = match result {
            Ok(tally) => UnitStatus::Succeeded { tally },
            Err(e) => {
                warn!(scope = ?scope, week = %week, error = %e, "unit failed");
                UnitStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        Self {
            scope,
            week,
            status,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, UnitStatus::Succeeded { .. })
    }
}

/// Outcome of one scheduling call. Lists only units that were attempted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub units: Vec<UnitReport>,
    pub cancelled: bool,
}

impl ScheduleReport {
    pub fn succeeded(&self) -> usize {
        self.units.iter().filter(|u| u.succeeded()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| !u.succeeded())
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.units.iter().all(UnitReport::succeeded)
    }

    /// Sum of the tallies of every successful unit.
    pub fn total(&self) -> UnitTally {
        let mut total = UnitTally::default();
        for unit in &self.units {
            if let UnitStatus::Succeeded { tally } = &unit.status {
                total += *tally;
            }
        }
        total
    }

    fn merge(&mut self, other: ScheduleReport) {
        self.units.extend(other.units);
        self.cancelled |= other.cancelled;
    }

    fn sorted(mut self) -> Self {
        self.units.sort_by(|a, b| (a.week, &a.scope).cmp(&(b.week, &b.scope)));
        self
    }
}

// ─── Scheduler ───────────────────────────────────────────────────────

pub struct PeriodScheduler {
    engine: Arc<AggregationEngine>,
    locks: Arc<KeyLocks>,
    cancel: Arc<Cancellation>,
    parallel: bool,
}

impl PeriodScheduler {
    pub fn new(engine: Arc<AggregationEngine>) -> Self {
        Self {
            engine,
            locks: Arc::new(KeyLocks::new()),
            cancel: Arc::new(Cancellation::new()),
            parallel: true,
        }
    }

    /// Share a lock table with other schedulers over the same store.
    pub fn with_locks(mut self, locks: Arc<KeyLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_cancellation(mut self, cancel: Arc<Cancellation>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Disable rayon fan-out (useful for deterministic debugging).
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Aggregate every operation for one week.
    ///
    /// `commodities = None` discovers the commodities with data that week.
    /// Failing to discover them is the only error returned; per-unit
    /// failures are recorded in the report.
    pub fn aggregate_week(
        &self,
        week: NaiveDate,
        commodities: Option<&[String]>,
    ) -> Result<ScheduleReport, StoreError> {
        let commodities: Vec<String> = match commodities {
            Some(list) => list
                .iter()
                .map(|c| normalize_key(c))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            None => self.engine.raw().distinct_commodities(week)?,
        };
        info!(week = %week, commodities = commodities.len(), "aggregating week");

        let mut report = ScheduleReport::default();
        let units: Vec<Option<UnitReport>> = self.map(&commodities, |commodity| {
            if self.cancel.is_cancelled() {
                return None;
            }
            Some(self.run_commodity_unit(commodity, week))
        });
        report.cancelled = units.iter().any(Option::is_none);
        report.units = units.into_iter().flatten().collect();

        if commodities.iter().any(|c| self.engine.config().in_class_family(c)) {
            match self.run_classes_unit(week) {
                Some(unit) => report.units.push(unit),
                None => report.cancelled = true,
            }
        }
        Ok(report.sorted())
    }

    /// Aggregate every week with data in `[start, end]` (both optional).
    ///
    /// Each commodity's weeks run in ascending order on one task; the
    /// commodities themselves run in parallel. A configuration error on a
    /// commodity fails its remaining weeks without touching the store.
    pub fn aggregate_all_weeks(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<ScheduleReport, StoreError> {
        let weeks = self.engine.raw().distinct_weeks(start, end)?;
        let mut plan: BTreeMap<String, Vec<NaiveDate>> = BTreeMap::new();
        for week in &weeks {
            for commodity in self.engine.raw().distinct_commodities(*week)? {
                plan.entry(commodity).or_default().push(*week);
            }
        }
        info!(
            weeks = weeks.len(),
            commodities = plan.len(),
            "aggregating observed range"
        );

        let chains: Vec<(&String, &Vec<NaiveDate>)> = plan.iter().collect();
        let mut report = ScheduleReport::default();
        for chain in self.map(&chains, |(commodity, weeks)| self.run_chain(commodity, weeks)) {
            report.merge(chain);
        }

        let class_weeks: Vec<NaiveDate> = plan
            .iter()
            .filter(|(c, _)| self.engine.config().in_class_family(c))
            .flat_map(|(_, w)| w.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for unit in self.map(&class_weeks, |week| self.run_classes_unit(*week)) {
            match unit {
                Some(unit) => report.units.push(unit),
                None => report.cancelled = true,
            }
        }

        let report = report.sorted();
        info!(
            succeeded = report.succeeded(),
            failed = report.failed().count(),
            cancelled = report.cancelled,
            "aggregation finished"
        );
        Ok(report)
    }

    /// Recompute the rolling window for every observed day of every daily
    /// series within `[start, end]` (both optional).
    pub fn aggregate_daily_series(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<ScheduleReport, StoreError> {
        let start = start.unwrap_or(NaiveDate::MIN);
        let end = end.unwrap_or(NaiveDate::MAX);
        let mut plan: Vec<(String, Vec<NaiveDate>)> = Vec::new();
        for series in self.engine.raw().daily_series()? {
            let days: BTreeSet<NaiveDate> = self
                .engine
                .raw()
                .daily_observations(&series, start, end)?
                .into_iter()
                .map(|o| o.date)
                .collect();
            plan.push((series, days.into_iter().collect()));
        }

        let mut report = ScheduleReport::default();
        for chain in self.map(&plan, |(series, days)| {
            let mut chain = ScheduleReport::default();
            for day in days {
                if self.cancel.is_cancelled() {
                    chain.cancelled = true;
                    break;
                }
                let lock_key = format!("rolling:{series}");
                let result = self.locks.with_lock(&lock_key, *day, || {
                    self.engine.aggregate_rolling(series, *day)
                });
                chain.units.push(UnitReport::from_result(
                    UnitScope::Rolling(series.clone()),
                    *day,
                    result,
                ));
            }
            chain
        }) {
            report.merge(chain);
        }
        Ok(report.sorted())
    }

    /// Rewrite `my_to_date_pounds` for one marketing year by walking the
    /// persisted summaries in week order. Returns the number of rows whose
    /// value changed.
    ///
    /// Each week's row is re-read and rewritten under that week's key lock;
    /// only the running total carries over between weeks.
    pub fn recalculate_marketing_year_totals(
        &self,
        year: i32,
        commodity: &str,
    ) -> Result<usize, AggregationError> {
        let commodity = normalize_key(commodity);
        let (start, end) = self
            .engine
            .resolver()
            .marketing_year_range(&commodity, year)?;
        let weeks: Vec<NaiveDate> = self
            .engine
            .summaries()
            .summaries_for(&commodity, start, end)?
            .into_iter()
            .map(|row| row.week_ending)
            .collect();

        let mut running = 0.0;
        let mut rewritten = 0;
        for week in weeks {
            let changed = self.locks.with_lock(&commodity, week, || {
                self.rewrite_my_to_date(&commodity, week, &mut running)
            })?;
            if changed {
                rewritten += 1;
            }
        }
        info!(commodity = %commodity, year, rewritten, "marketing-year totals recalculated");
        Ok(rewritten)
    }

    /// Adds the week's total to `running` and stores it as the week's
    /// my-to-date. Returns whether the stored value changed.
    fn rewrite_my_to_date(
        &self,
        commodity: &str,
        week: NaiveDate,
        running: &mut f64,
    ) -> Result<bool, StoreError> {
        let summaries = self.engine.summaries();
        let Some(mut row) = summaries.get_summary(commodity, week)? else {
            return Ok(false);
        };
        *running += row.total_pounds;
        if row.my_to_date_pounds == *running {
            return Ok(false);
        }
        row.my_to_date_pounds = *running;
        summaries.upsert_summary(row)?;
        Ok(true)
    }

    // ── Units ──

    /// One commodity's weeks in ascending order.
    fn run_chain(&self, commodity: &str, weeks: &[NaiveDate]) -> ScheduleReport {
        let mut chain = ScheduleReport::default();
        let mut config_failure: Option<String> = None;
        for week in weeks {
            if self.cancel.is_cancelled() {
                chain.cancelled = true;
                break;
            }
            let scope = UnitScope::Commodity(commodity.to_string());
            if let Some(reason) = &config_failure {
                chain.units.push(UnitReport {
                    scope,
                    week: *week,
                    status: UnitStatus::Failed {
                        reason: reason.clone(),
                    },
                });
                continue;
            }
            let result = self
                .locks
                .with_lock(commodity, *week, || self.commodity_pass(commodity, *week));
            if let Err(e @ AggregationError::Config(_)) = &result {
                config_failure = Some(e.to_string());
            }
            chain
                .units
                .push(UnitReport::from_result(scope, *week, result));
        }
        chain
    }

    fn run_commodity_unit(&self, commodity: &str, week: NaiveDate) -> UnitReport {
        let result = self
            .locks
            .with_lock(commodity, week, || self.commodity_pass(commodity, week));
        UnitReport::from_result(UnitScope::Commodity(commodity.to_string()), week, result)
    }

    fn run_classes_unit(&self, week: NaiveDate) -> Option<UnitReport> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let result = self
            .locks
            .with_lock(CLASSES_LOCK, week, || self.engine.aggregate_classes(week));
        Some(UnitReport::from_result(UnitScope::Classes, week, result))
    }

    /// Summary first, then the independent destination and quality passes.
    fn commodity_pass(
        &self,
        commodity: &str,
        week: NaiveDate,
    ) -> Result<UnitTally, AggregationError> {
        let mut tally = self.engine.aggregate_commodity(week, commodity)?;

        let destinations = || {
            let mut sub = UnitTally::default();
            for dimension in Dimension::ALL {
                sub += self.engine.aggregate_destinations(week, commodity, dimension)?;
            }
            Ok::<_, AggregationError>(sub)
        };
        let quality = || self.engine.aggregate_quality(week, commodity);

        let (destinations, quality) = if self.parallel {
            rayon::join(destinations, quality)
        } else {
            (destinations(), quality())
        };
        tally += destinations?;
        tally += quality?;
        Ok(tally)
    }

    /// Map over `items` in parallel or sequentially, preserving order.
    fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.parallel {
            items.par_iter().map(f).collect()
        } else {
            items.iter().map(f).collect()
        }
    }
}
