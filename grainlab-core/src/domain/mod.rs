//! Domain types for the bronze, silver and gold layers.

pub mod record;
pub mod summary;

pub use record::{
    validate_record, BronzeRecord, DailyObservation, QualityField, QualityFields, RawRecord,
};
pub use summary::{
    ClassExports, ClassKey, DestinationRollup, Dimension, FieldStats, QualityKey, QualityStats,
    RollingKey, RollingStat, RollupKey, SummaryKey, WeeklyCommoditySummary,
};
