//! Error taxonomy shared by the aggregation engine and the verification runner.
//!
//! Each error is scoped to the smallest unit it can poison:
//! - `ConfigurationError` aborts one commodity, never the whole run.
//! - `StoreError` is fatal to the current scheduling unit.
//! - `RecordError` is skipped and counted, never fatal.
//! - `AggregationError` wraps the first two at the engine boundary.

use thiserror::Error;

/// Missing or invalid calendar/conversion configuration for a commodity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("unknown commodity '{commodity}': no marketing-year mapping configured")]
    UnknownCommodity { commodity: String },

    #[error("commodity '{commodity}' has invalid marketing-year start month {month}")]
    InvalidStartMonth { commodity: String, month: u32 },

    #[error("commodity '{commodity}' has non-positive conversion factor {factor}")]
    InvalidConversionFactor { commodity: String, factor: f64 },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The store could not be reached or could not answer a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),
}

/// One malformed or out-of-range record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record '{certificate_id}': missing field '{field}'")]
    MissingField {
        certificate_id: String,
        field: &'static str,
    },

    #[error("record '{certificate_id}': malformed {field} '{value}'")]
    Malformed {
        certificate_id: String,
        field: &'static str,
        value: String,
    },

    #[error("record '{certificate_id}': {field} = {value} is out of range")]
    OutOfRange {
        certificate_id: String,
        field: &'static str,
        value: f64,
    },
}

impl RecordError {
    pub fn certificate_id(&self) -> &str {
        match self {
            Self::MissingField { certificate_id, .. }
            | Self::Malformed { certificate_id, .. }
            | Self::OutOfRange { certificate_id, .. } => certificate_id,
        }
    }
}

/// A computation for one summary key failed; sibling keys still proceed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{view} key '{key}': {reason}")]
pub struct KeyError {
    pub view: &'static str,
    pub key: String,
    pub reason: String,
}

/// Errors surfaced by the aggregation engine to the scheduler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("data access error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from reading bronze input files.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: {message}")]
    Row { row: usize, message: String },
}
