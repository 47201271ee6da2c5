//! Store abstractions.
//!
//! The engine never talks to a database directly. It reads raw rows through
//! `RawRecordStore` and writes derived rows through `SummaryStore`, whose
//! upserts are keyed by each row's natural key. `InMemoryStore` implements
//! both and backs the CLI and the tests.

pub mod memory;

use chrono::NaiveDate;

use crate::domain::{
    BronzeRecord, ClassExports, ClassKey, DailyObservation, DestinationRollup, Dimension,
    QualityKey, QualityStats, RawRecord, RollingKey, RollingStat, RollupKey, WeeklyCommoditySummary,
};
use crate::error::StoreError;

pub use memory::InMemoryStore;

/// Gold views a complete deployment materializes.
pub const STANDARD_VIEWS: [&str; 7] = [
    "weekly_commodity_summary",
    "destination_country",
    "destination_region",
    "destination_port_region",
    "class_exports",
    "quality_stats",
    "rolling_stats",
];

/// Read access to the bronze and silver layers.
pub trait RawRecordStore: Send + Sync {
    /// Every silver record for a (commodity, week) key.
    fn records_for(&self, commodity: &str, week: NaiveDate) -> Result<Vec<RawRecord>, StoreError>;

    /// Distinct commodities with silver data for a week, sorted.
    fn distinct_commodities(&self, week: NaiveDate) -> Result<Vec<String>, StoreError>;

    /// Distinct destination keys among the valid records of a (commodity, week).
    ///
    /// Records rejected by `validate_record` are never aggregated, so their
    /// destinations are not expected in any rollup either.
    /// For `Dimension::Port` this returns raw port names, not port-regions;
    /// mapping is the caller's policy.
    fn distinct_destinations(
        &self,
        commodity: &str,
        week: NaiveDate,
        dimension: Dimension,
    ) -> Result<Vec<String>, StoreError>;

    /// Distinct week-ending dates with data, ascending, optionally bounded (inclusive).
    fn distinct_weeks(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<NaiveDate>, StoreError>;

    /// All silver records.
    fn all_records(&self) -> Result<Vec<RawRecord>, StoreError>;

    /// All bronze payloads.
    fn bronze_records(&self) -> Result<Vec<BronzeRecord>, StoreError>;

    /// Most recent bronze ingestion date.
    fn latest_ingestion(&self) -> Result<Option<NaiveDate>, StoreError>;

    /// Names of the daily series held in the silver layer, sorted.
    fn daily_series(&self) -> Result<Vec<String>, StoreError>;

    /// Observations of a series within `[start, end]`, ascending by date.
    fn daily_observations(
        &self,
        series: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyObservation>, StoreError>;
}

/// Upsert-by-natural-key storage for the gold layer.
pub trait SummaryStore: Send + Sync {
    fn get_summary(
        &self,
        commodity: &str,
        week: NaiveDate,
    ) -> Result<Option<WeeklyCommoditySummary>, StoreError>;
    fn upsert_summary(&self, row: WeeklyCommoditySummary) -> Result<(), StoreError>;
    /// Summaries of one commodity within `[start, end]`, ascending by week.
    fn summaries_for(
        &self,
        commodity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeeklyCommoditySummary>, StoreError>;
    fn all_summaries(&self) -> Result<Vec<WeeklyCommoditySummary>, StoreError>;

    fn get_rollup(&self, key: &RollupKey) -> Result<Option<DestinationRollup>, StoreError>;
    fn upsert_rollup(&self, row: DestinationRollup) -> Result<(), StoreError>;
    fn rollups_for(
        &self,
        commodity: &str,
        week: NaiveDate,
        dimension: Dimension,
    ) -> Result<Vec<DestinationRollup>, StoreError>;

    fn get_class_exports(&self, key: &ClassKey) -> Result<Option<ClassExports>, StoreError>;
    fn upsert_class_exports(&self, row: ClassExports) -> Result<(), StoreError>;
    fn class_exports_for(&self, week: NaiveDate) -> Result<Vec<ClassExports>, StoreError>;

    fn get_quality(&self, key: &QualityKey) -> Result<Option<QualityStats>, StoreError>;
    fn upsert_quality(&self, row: QualityStats) -> Result<(), StoreError>;

    fn get_rolling(&self, key: &RollingKey) -> Result<Option<RollingStat>, StoreError>;
    fn upsert_rolling(&self, row: RollingStat) -> Result<(), StoreError>;
    fn all_rolling(&self) -> Result<Vec<RollingStat>, StoreError>;

    /// Names of the gold views that currently exist.
    fn materialized_views(&self) -> Result<Vec<String>, StoreError>;
}
