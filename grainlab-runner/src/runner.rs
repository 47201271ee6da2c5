//! Check suites and the verification runner.
//!
//! Every check of every suite runs independently (in parallel by default);
//! results come back in registration order. An error or panic inside one
//! check becomes a failed result for that check only.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use grainlab_core::Cancellation;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::check::{CheckResult, ConsistencyCheck, Layer};

// ─── Suite ───────────────────────────────────────────────────────────

/// An ordered set of checks scoped to one layer.
pub struct CheckSuite {
    layer: Layer,
    checks: Vec<Arc<dyn ConsistencyCheck>>,
}

impl CheckSuite {
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: impl ConsistencyCheck + 'static) -> Self {
        self.add(check);
        self
    }

    pub fn add(&mut self, check: impl ConsistencyCheck + 'static) {
        self.checks.push(Arc::new(check));
    }

    /// Removes a check by name; returns whether one was registered.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.checks.len();
        self.checks.retain(|c| c.name() != name);
        self.checks.len() != before
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

// ─── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Outcome of one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub tally: Tally,
    pub suites: BTreeMap<Layer, Vec<CheckResult>>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Results of one layer, empty if that suite was not run.
    pub fn results(&self, layer: Layer) -> &[CheckResult] {
        self.suites.get(&layer).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn find(&self, name: &str) -> Option<&CheckResult> {
        self.suites.values().flatten().find(|r| r.name == name)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.suites.values().flatten().filter(|r| !r.passed)
    }
}

// ─── Runner ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed { success: bool },
}

/// Executes registered suites and tallies their results.
pub struct VerificationRunner {
    suites: Vec<CheckSuite>,
    cancel: Option<Arc<Cancellation>>,
    parallel: bool,
    state: RunState,
}

impl VerificationRunner {
    pub fn new(suites: Vec<CheckSuite>) -> Self {
        Self {
            suites,
            cancel: None,
            parallel: true,
            state: RunState::NotStarted,
        }
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Checks not yet started when the token trips are reported as not run.
    pub fn with_cancellation(mut self, cancel: Arc<Cancellation>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run(&mut self) -> VerificationReport {
        self.state = RunState::Running;
        let started_at = Utc::now();

        let jobs: Vec<(Layer, &Arc<dyn ConsistencyCheck>)> = self
            .suites
            .iter()
            .flat_map(|suite| suite.checks.iter().map(move |c| (suite.layer, c)))
            .collect();
        info!(checks = jobs.len(), suites = self.suites.len(), "verification started");

        let cancel = self.cancel.as_deref();
        let results: Vec<(Layer, CheckResult)> = if self.parallel {
            jobs.par_iter()
                .map(|(layer, check)| (*layer, execute(check, cancel)))
                .collect()
        } else {
            jobs.iter()
                .map(|(layer, check)| (*layer, execute(check, cancel)))
                .collect()
        };

        let mut suites: BTreeMap<Layer, Vec<CheckResult>> = BTreeMap::new();
        for suite in &self.suites {
            suites.entry(suite.layer).or_default();
        }
        let mut tally = Tally::default();
        for (layer, result) in results {
            tally.total += 1;
            if result.passed {
                tally.passed += 1;
            } else {
                tally.failed += 1;
            }
            suites.entry(layer).or_default().push(result);
        }

        let passed = tally.failed == 0;
        let cancelled = cancel.is_some_and(Cancellation::is_cancelled);
        self.state = RunState::Completed { success: passed };
        info!(
            total = tally.total,
            passed = tally.passed,
            failed = tally.failed,
            cancelled,
            "verification finished"
        );

        VerificationReport {
            passed,
            tally,
            suites,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Runs one check, converting errors and panics into failed results.
fn execute(check: &Arc<dyn ConsistencyCheck>, cancel: Option<&Cancellation>) -> CheckResult {
    let (name, layer) = (check.name(), check.layer());
    if cancel.is_some_and(Cancellation::is_cancelled) {
        return CheckResult::could_not_run(name, layer, "run cancelled before this check started");
    }

    let started = Instant::now();
    let mut result = match panic::catch_unwind(AssertUnwindSafe(|| check.run())) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(check = name, error = %e, "check could not run");
            CheckResult::could_not_run(name, layer, e)
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!(check = name, panic = %message, "check panicked");
            CheckResult::could_not_run(name, layer, format!("panicked: {message}"))
        }
    };
    result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    info!(
        check = name,
        layer = %layer,
        passed = result.passed,
        checked = result.records_checked,
        failed = result.records_failed,
        "check finished"
    );
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
