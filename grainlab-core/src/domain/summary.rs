//! Gold-layer summary rows and their natural keys.
//!
//! Every row type exposes `key()`; stores upsert by that key, so writing the
//! same row twice leaves one row.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::record::QualityField;

// ─── Weekly commodity summary ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SummaryKey {
    pub commodity: String,
    pub week_ending: NaiveDate,
}

/// One row per (commodity, week).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyCommoditySummary {
    pub commodity: String,
    pub week_ending: NaiveDate,
    pub marketing_year: i32,
    pub total_pounds: f64,
    pub total_bushels: f64,
    pub total_metric_tons: f64,
    pub certificate_count: usize,
    pub prior_week_pounds: Option<f64>,
    pub year_ago_pounds: Option<f64>,
    pub wow_change_pct: Option<f64>,
    pub yoy_change_pct: Option<f64>,
    /// Week-over-week change reached the configured alert threshold.
    pub alert: bool,
    pub my_to_date_pounds: f64,
}

impl WeeklyCommoditySummary {
    /// Empty row for a key; every field is set by the writer.
    pub fn new(commodity: impl Into<String>, week_ending: NaiveDate) -> Self {
        Self {
            commodity: commodity.into(),
            week_ending,
            marketing_year: 0,
            total_pounds: 0.0,
            total_bushels: 0.0,
            total_metric_tons: 0.0,
            certificate_count: 0,
            prior_week_pounds: None,
            year_ago_pounds: None,
            wow_change_pct: None,
            yoy_change_pct: None,
            alert: false,
            my_to_date_pounds: 0.0,
        }
    }

    pub fn key(&self) -> SummaryKey {
        SummaryKey {
            commodity: self.commodity.clone(),
            week_ending: self.week_ending,
        }
    }
}

// ─── Destination rollups ─────────────────────────────────────────────

/// Destination facet of a rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Country,
    Region,
    /// Keyed by port-region; ports without a mapping are left out.
    Port,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Country, Dimension::Region, Dimension::Port];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Region => "region",
            Self::Port => "port",
        }
    }

    /// Name of the gold view holding this dimension's rollups.
    pub fn view_name(&self) -> &'static str {
        match self {
            Self::Country => "destination_country",
            Self::Region => "destination_region",
            Self::Port => "destination_port_region",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RollupKey {
    pub commodity: String,
    pub week_ending: NaiveDate,
    pub dimension: Dimension,
    pub destination: String,
}

/// One row per (commodity, week, dimension, destination).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRollup {
    pub commodity: String,
    pub week_ending: NaiveDate,
    pub dimension: Dimension,
    pub destination: String,
    pub pounds: f64,
    pub certificate_count: usize,
    /// Share of the commodity's weekly pounds, in percent.
    pub share_pct: f64,
}

impl DestinationRollup {
    pub fn new(key: &RollupKey) -> Self {
        Self {
            commodity: key.commodity.clone(),
            week_ending: key.week_ending,
            dimension: key.dimension,
            destination: key.destination.clone(),
            pounds: 0.0,
            certificate_count: 0,
            share_pct: 0.0,
        }
    }

    pub fn key(&self) -> RollupKey {
        RollupKey {
            commodity: self.commodity.clone(),
            week_ending: self.week_ending,
            dimension: self.dimension,
            destination: self.destination.clone(),
        }
    }
}

// ─── Class exports ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassKey {
    pub week_ending: NaiveDate,
    pub class: String,
    pub region: String,
}

/// One row per (week, class, region) for class-family commodities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassExports {
    pub week_ending: NaiveDate,
    pub class: String,
    pub region: String,
    pub pounds: f64,
    pub certificate_count: usize,
    /// Null-safe averages; a field nobody reported is absent.
    pub quality_averages: BTreeMap<QualityField, f64>,
}

impl ClassExports {
    pub fn new(key: &ClassKey) -> Self {
        Self {
            week_ending: key.week_ending,
            class: key.class.clone(),
            region: key.region.clone(),
            pounds: 0.0,
            certificate_count: 0,
            quality_averages: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ClassKey {
        ClassKey {
            week_ending: self.week_ending,
            class: self.class.clone(),
            region: self.region.clone(),
        }
    }
}

// ─── Quality stats ───────────────────────────────────────────────────

/// count/sum/avg/min/max of one quality field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualityKey {
    pub week_ending: NaiveDate,
    pub commodity: String,
    /// `None` is the overall (region-independent) row.
    pub region: Option<String>,
}

/// One row per (week, commodity, region-or-overall).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub week_ending: NaiveDate,
    pub commodity: String,
    pub region: Option<String>,
    /// Records that contributed at least one quality value.
    pub record_count: usize,
    pub fields: BTreeMap<QualityField, FieldStats>,
}

impl QualityStats {
    pub fn new(key: &QualityKey) -> Self {
        Self {
            week_ending: key.week_ending,
            commodity: key.commodity.clone(),
            region: key.region.clone(),
            record_count: 0,
            fields: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> QualityKey {
        QualityKey {
            week_ending: self.week_ending,
            commodity: self.commodity.clone(),
            region: self.region.clone(),
        }
    }
}

// ─── Rolling statistics ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RollingKey {
    pub series: String,
    pub as_of: NaiveDate,
}

/// Trailing-window aggregate of a daily series, ending at `as_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStat {
    pub series: String,
    pub as_of: NaiveDate,
    pub window_days: u32,
    /// Distinct days with an observation inside the window.
    pub day_count: u32,
    pub sum: f64,
    pub mean: f64,
}

impl RollingStat {
    pub fn new(key: &RollingKey, window_days: u32) -> Self {
        Self {
            series: key.series.clone(),
            as_of: key.as_of,
            window_days,
            day_count: 0,
            sum: 0.0,
            mean: 0.0,
        }
    }

    pub fn key(&self) -> RollingKey {
        RollingKey {
            series: self.series.clone(),
            as_of: self.as_of,
        }
    }
}
