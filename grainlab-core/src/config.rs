//! Pipeline configuration.
//!
//! One `PipelineConfig` is built at startup (defaults, optionally overridden
//! from a TOML file) and handed to every component at construction. Nothing
//! reads configuration from the environment.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Marketing-year start and mass conversion for one commodity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommodityCalendar {
    /// Month (1-12) on whose first day the marketing year begins.
    pub start_month: u32,
    /// Pounds per bushel (per hundredweight for sunflower).
    pub pounds_per_bushel: f64,
}

/// Numeric tolerances used by aggregation and verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Relative tolerance for cross-layer total reconciliation (0.001 = 0.1%).
    pub reconciliation_rel: f64,
    /// Absolute tolerance for recomputed rolling statistics.
    pub rolling_abs: f64,
    /// Maximum share of malformed payloads / mistransformed rows.
    pub max_malformed_rate: f64,
    /// Maximum share of rows outside physically plausible ranges.
    pub max_range_violation_rate: f64,
    /// Minimum share of sampled certificates agreeing with the original source.
    pub min_source_agreement: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            reconciliation_rel: 0.001,
            rolling_abs: 0.01,
            max_malformed_rate: 0.01,
            max_range_violation_rate: 0.01,
            min_source_agreement: 0.80,
        }
    }
}

/// Inclusive plausible range for one measured value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Physically plausible bounds for silver-layer values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueRanges {
    /// Largest plausible single certificate, in pounds.
    pub max_certificate_pounds: f64,
    pub test_weight: ValueRange,
    pub moisture: ValueRange,
    pub protein: ValueRange,
    pub dockage: ValueRange,
    pub foreign_material: ValueRange,
    pub total_damage: ValueRange,
}

impl Default for ValueRanges {
    fn default() -> Self {
        Self {
            // A Panamax hold carries roughly 150 million pounds.
            max_certificate_pounds: 200_000_000.0,
            test_weight: ValueRange::new(20.0, 75.0),
            moisture: ValueRange::new(0.0, 40.0),
            protein: ValueRange::new(0.0, 30.0),
            dockage: ValueRange::new(0.0, 20.0),
            foreign_material: ValueRange::new(0.0, 20.0),
            total_damage: ValueRange::new(0.0, 100.0),
        }
    }
}

/// Settings for the verification suites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// First week-ending date of the expected reporting calendar.
    /// `None` starts the calendar at the earliest observed week.
    pub calendar_start: Option<NaiveDate>,
    /// Bronze data older than `today - max_staleness_days` is stale.
    pub max_staleness_days: i64,
    /// Rows drawn per spot check.
    pub sample_size: usize,
    /// Seed for spot-check sampling, so repeated runs inspect the same rows.
    pub sample_seed: u64,
    /// Per-request timeout for original-source lookups.
    pub source_timeout_secs: u64,
    /// Gold views that must exist.
    pub required_views: Vec<String>,
    pub ranges: ValueRanges,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            calendar_start: None,
            max_staleness_days: 1,
            sample_size: 25,
            sample_seed: 42,
            source_timeout_secs: 10,
            required_views: crate::store::STANDARD_VIEWS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            ranges: ValueRanges::default(),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Calendar per commodity, keyed by upper-case commodity name.
    pub commodities: BTreeMap<String, CommodityCalendar>,
    /// Port name (upper-case) to port-region.
    pub port_regions: BTreeMap<String, String>,
    /// Case-insensitive substrings selecting commodities with class rollups.
    pub class_families: Vec<String>,
    /// Week-over-week change (percent, absolute) that raises an alert.
    pub alert_threshold_pct: f64,
    /// Days in the rolling window for daily series.
    pub rolling_window_days: u32,
    pub tolerances: Tolerances,
    pub verification: VerificationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_us()
    }
}

impl PipelineConfig {
    /// US grain export defaults.
    pub fn default_us() -> Self {
        let commodities = [
            ("WHEAT", 6, 60.0),
            ("BARLEY", 6, 48.0),
            ("OATS", 6, 32.0),
            ("RYE", 6, 56.0),
            ("RICE", 8, 45.0),
            ("CORN", 9, 56.0),
            ("SORGHUM", 9, 56.0),
            ("SOYBEANS", 9, 60.0),
            ("FLAXSEED", 9, 56.0),
            ("SUNFLOWER", 9, 100.0),
        ]
        .into_iter()
        .map(|(name, start_month, pounds_per_bushel)| {
            (
                name.to_string(),
                CommodityCalendar {
                    start_month,
                    pounds_per_bushel,
                },
            )
        })
        .collect();

        let port_regions = [
            ("NEW ORLEANS", "MISSISSIPPI RIVER"),
            ("BATON ROUGE", "MISSISSIPPI RIVER"),
            ("DESTREHAN", "MISSISSIPPI RIVER"),
            ("HOUSTON", "TEXAS GULF"),
            ("GALVESTON", "TEXAS GULF"),
            ("CORPUS CHRISTI", "TEXAS GULF"),
            ("BEAUMONT", "TEXAS GULF"),
            ("PORTLAND", "COLUMBIA RIVER"),
            ("KALAMA", "COLUMBIA RIVER"),
            ("LONGVIEW", "COLUMBIA RIVER"),
            ("VANCOUVER", "COLUMBIA RIVER"),
            ("SEATTLE", "PUGET SOUND"),
            ("TACOMA", "PUGET SOUND"),
            ("NORFOLK", "ATLANTIC"),
            ("BALTIMORE", "ATLANTIC"),
            ("PHILADELPHIA", "ATLANTIC"),
            ("DULUTH", "GREAT LAKES"),
            ("TOLEDO", "GREAT LAKES"),
            ("CHICAGO", "GREAT LAKES"),
        ]
        .into_iter()
        .map(|(port, region)| (port.to_string(), region.to_string()))
        .collect();

        Self {
            commodities,
            port_regions,
            class_families: vec!["wheat".to_string()],
            alert_threshold_pct: 25.0,
            rolling_window_days: 7,
            tolerances: Tolerances::default(),
            verification: VerificationConfig::default(),
        }
    }

    /// Load a configuration from a TOML file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::Invalid(format!("read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigurationError> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| ConfigurationError::Invalid(format!("parse TOML: {e}")))?;
        config.normalize_keys();
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigurationError::Invalid(format!("serialize TOML: {e}")))
    }

    /// Upper-case commodity and port keys so lookups are case-insensitive.
    fn normalize_keys(&mut self) {
        self.commodities = std::mem::take(&mut self.commodities)
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), v))
            .collect();
        self.port_regions = std::mem::take(&mut self.port_regions)
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), normalize_key(&v)))
            .collect();
    }

    /// Reject values no component could work with.
    ///
    /// Per-commodity calendar problems are deliberately NOT rejected here:
    /// the resolver reports them scoped to the offending commodity.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.rolling_window_days == 0 {
            return Err(ConfigurationError::Invalid(
                "rolling_window_days must be at least 1".into(),
            ));
        }
        if !(self.alert_threshold_pct.is_finite() && self.alert_threshold_pct > 0.0) {
            return Err(ConfigurationError::Invalid(format!(
                "alert_threshold_pct must be positive, got {}",
                self.alert_threshold_pct
            )));
        }
        let t = &self.tolerances;
        for (name, value) in [
            ("reconciliation_rel", t.reconciliation_rel),
            ("rolling_abs", t.rolling_abs),
            ("max_malformed_rate", t.max_malformed_rate),
            ("max_range_violation_rate", t.max_range_violation_rate),
            ("min_source_agreement", t.min_source_agreement),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::Invalid(format!(
                    "tolerance {name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.verification.max_staleness_days < 0 {
            return Err(ConfigurationError::Invalid(
                "max_staleness_days must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Port-region for a port, if the port is mapped.
    pub fn port_region(&self, port: &str) -> Option<&str> {
        self.port_regions
            .get(&normalize_key(port))
            .map(|s| s.as_str())
    }

    /// Whether a commodity belongs to a class-rollup family.
    pub fn in_class_family(&self, commodity: &str) -> bool {
        let lower = commodity.to_lowercase();
        self.class_families
            .iter()
            .any(|family| lower.contains(&family.to_lowercase()))
    }
}

/// Canonical form of commodity, port, country and region keys.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_uppercase()
}
