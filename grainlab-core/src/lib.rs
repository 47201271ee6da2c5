//! GrainLab Core: domain types, configuration, stores, aggregation and scheduling.
//!
//! This crate holds everything that derives the gold layer:
//! - Domain types for bronze payloads, silver records and gold rows
//! - `PipelineConfig` and the `MarketingYearResolver`
//! - Store traits plus a thread-safe in-memory store
//! - The bronze → silver adapter boundary
//! - `AggregationEngine` (idempotent upserts) and `PeriodScheduler`

pub mod adapter;
pub mod aggregate;
pub mod calendar;
pub mod config;
pub mod domain;
pub mod error;
pub mod schedule;
pub mod store;

pub use aggregate::{AggregationEngine, UnitTally};
pub use calendar::MarketingYearResolver;
pub use config::PipelineConfig;
pub use error::{AggregationError, ConfigurationError, RecordError, StoreError};
pub use schedule::{Cancellation, KeyLocks, PeriodScheduler, ScheduleReport};
pub use store::{InMemoryStore, RawRecordStore, SummaryStore};
