//! The `ConsistencyCheck` interface and its structured result.
//!
//! A check counts what it examined (`record_pass` / `record_failure`) and
//! then settles pass/fail with one of the `finish_*` policies:
//! - zero tolerance for integrity-critical checks
//! - a maximum failure rate for data-quality checks
//! - a minimum pass rate for external agreement

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use grainlab_core::{
    ConfigurationError, MarketingYearResolver, PipelineConfig, RawRecordStore, StoreError,
    SummaryStore,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Diagnostics kept per check; the counts stay exact beyond this.
pub const MAX_DIAGNOSTICS: usize = 20;

// ─── Layer ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Bronze, Layer::Silver, Layer::Gold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bronze" => Ok(Self::Bronze),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            other => Err(format!("unknown layer '{other}' (expected bronze, silver or gold)")),
        }
    }
}

// ─── Result ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub layer: Layer,
    pub passed: bool,
    pub records_checked: usize,
    pub records_passed: usize,
    pub records_failed: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CheckResult {
    /// An empty, not-yet-settled result.
    pub fn new(name: impl Into<String>, layer: Layer) -> Self {
        Self {
            name: name.into(),
            layer,
            passed: false,
            records_checked: 0,
            records_passed: 0,
            records_failed: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }

    /// A check that could not run at all.
    pub fn could_not_run(name: impl Into<String>, layer: Layer, reason: impl fmt::Display) -> Self {
        let mut result = Self::new(name, layer);
        result.errors.push(format!("check could not run: {reason}"));
        result
    }

    pub fn record_pass(&mut self) {
        self.records_checked += 1;
        self.records_passed += 1;
    }

    pub fn record_failure(&mut self, diagnostic: impl Into<String>) {
        self.records_checked += 1;
        self.records_failed += 1;
        if self.errors.len() < MAX_DIAGNOSTICS {
            self.errors.push(diagnostic.into());
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        if self.warnings.len() < MAX_DIAGNOSTICS {
            self.warnings.push(warning.into());
        }
    }

    /// Fraction of examined records that passed; 1.0 when nothing was examined.
    pub fn pass_rate(&self) -> f64 {
        if self.records_checked == 0 {
            1.0
        } else {
            self.records_passed as f64 / self.records_checked as f64
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.records_checked == 0 {
            0.0
        } else {
            self.records_failed as f64 / self.records_checked as f64
        }
    }

    pub fn finish_zero_tolerance(mut self) -> Self {
        self.passed = self.records_failed == 0;
        self
    }

    pub fn finish_with_max_failure_rate(mut self, max_rate: f64) -> Self {
        self.passed = self.failure_rate() <= max_rate;
        if !self.passed {
            self.errors.push(format!(
                "failure rate {:.2}% exceeds allowed {:.2}%",
                self.failure_rate() * 100.0,
                max_rate * 100.0
            ));
        }
        self
    }

    pub fn finish_with_min_pass_rate(mut self, min_rate: f64) -> Self {
        self.passed = self.pass_rate() >= min_rate;
        if !self.passed {
            self.errors.push(format!(
                "agreement {:.2}% below required {:.2}%",
                self.pass_rate() * 100.0,
                min_rate * 100.0
            ));
        }
        self
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// A check was unable to produce a verdict.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("data access error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("{0}")]
    Other(String),
}

// ─── Interface ───────────────────────────────────────────────────────

/// One named validation producing a structured pass/fail result.
///
/// Checks are read-only over already-materialized layers and share no
/// mutable state, so a suite may run them concurrently.
pub trait ConsistencyCheck: Send + Sync {
    fn name(&self) -> &str;
    fn layer(&self) -> Layer;
    fn run(&self) -> Result<CheckResult, CheckError>;
}

/// Everything a check may read, injected at construction.
pub struct VerificationContext {
    pub raw: Arc<dyn RawRecordStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub config: Arc<PipelineConfig>,
    /// Reference date for freshness ("yesterday" is `today - 1`) and the
    /// end of the completeness calendar.
    pub today: NaiveDate,
}

impl VerificationContext {
    pub fn new(
        raw: Arc<dyn RawRecordStore>,
        summaries: Arc<dyn SummaryStore>,
        config: Arc<PipelineConfig>,
        today: NaiveDate,
    ) -> Self {
        Self {
            raw,
            summaries,
            config,
            today,
        }
    }

    pub fn resolver(&self) -> MarketingYearResolver {
        MarketingYearResolver::new(&self.config)
    }
}

/// Relative comparison used by every reconciliation-style check.
pub fn within_relative(actual: f64, expected: f64, rel_tolerance: f64) -> bool {
    let scale = expected.abs().max(actual.abs());
    if scale == 0.0 {
        return true;
    }
    (actual - expected).abs() <= rel_tolerance * scale
}
