//! In-memory implementation of both store traits.
//!
//! Tables are `BTreeMap`s keyed by each row's natural key, so upserts
//! overwrite in place and iteration order is deterministic. An availability
//! switch lets tests simulate an unreachable store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;

use super::{RawRecordStore, SummaryStore, STANDARD_VIEWS};
use crate::config::normalize_key;
use crate::domain::{
    validate_record, BronzeRecord, ClassExports, ClassKey, DailyObservation, DestinationRollup,
    Dimension, QualityKey, QualityStats, RawRecord, RollingKey, RollingStat, RollupKey,
    SummaryKey, WeeklyCommoditySummary,
};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct GoldTables {
    summaries: BTreeMap<SummaryKey, WeeklyCommoditySummary>,
    rollups: BTreeMap<RollupKey, DestinationRollup>,
    classes: BTreeMap<ClassKey, ClassExports>,
    quality: BTreeMap<QualityKey, QualityStats>,
    rolling: BTreeMap<RollingKey, RollingStat>,
}

/// Thread-safe in-memory bronze/silver/gold store.
#[derive(Debug)]
pub struct InMemoryStore {
    bronze: RwLock<Vec<BronzeRecord>>,
    silver: RwLock<Vec<RawRecord>>,
    daily: RwLock<Vec<DailyObservation>>,
    gold: RwLock<GoldTables>,
    views: RwLock<BTreeSet<String>>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store with every standard view present.
    pub fn new() -> Self {
        Self {
            bronze: RwLock::new(Vec::new()),
            silver: RwLock::new(Vec::new()),
            daily: RwLock::new(Vec::new()),
            gold: RwLock::new(GoldTables::default()),
            views: RwLock::new(STANDARD_VIEWS.iter().map(|v| v.to_string()).collect()),
            available: AtomicBool::new(true),
        }
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked offline".into()))
        }
    }

    fn read<'a, T>(&self, lock: &'a RwLock<T>) -> Result<RwLockReadGuard<'a, T>, StoreError> {
        self.ensure_available()?;
        lock.read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn write<'a, T>(&self, lock: &'a RwLock<T>) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
        self.ensure_available()?;
        lock.write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    // ── Loading and administration (not part of the store traits) ──

    /// Simulate the store going offline (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn insert_bronze(&self, records: Vec<BronzeRecord>) -> Result<(), StoreError> {
        self.write(&self.bronze)?.extend(records);
        Ok(())
    }

    pub fn insert_records(&self, records: Vec<RawRecord>) -> Result<(), StoreError> {
        self.write(&self.silver)?.extend(records);
        Ok(())
    }

    /// Replace every silver record with the same certificate id, or append.
    pub fn replace_record(&self, record: RawRecord) -> Result<(), StoreError> {
        let mut silver = self.write(&self.silver)?;
        silver.retain(|r| r.certificate_id != record.certificate_id);
        silver.push(record);
        Ok(())
    }

    pub fn insert_daily(&self, observations: Vec<DailyObservation>) -> Result<(), StoreError> {
        self.write(&self.daily)?.extend(observations);
        Ok(())
    }

    /// Delete one day of a daily series. Returns how many rows were removed.
    pub fn remove_daily(&self, series: &str, date: NaiveDate) -> Result<usize, StoreError> {
        let mut daily = self.write(&self.daily)?;
        let before = daily.len();
        daily.retain(|o| !(o.series == series && o.date == date));
        Ok(before - daily.len())
    }

    pub fn drop_view(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.write(&self.views)?.remove(name))
    }

    pub fn rollup_count(&self) -> Result<usize, StoreError> {
        Ok(self.read(&self.gold)?.rollups.len())
    }

    /// Content hash of the whole gold layer.
    ///
    /// Two stores with identical gold rows produce the same fingerprint.
    pub fn fingerprint(&self) -> Result<String, StoreError> {
        let gold = self.read(&self.gold)?;
        let bytes = serde_json::to_vec(&(
            gold.summaries.values().collect::<Vec<_>>(),
            gold.rollups.values().collect::<Vec<_>>(),
            gold.classes.values().collect::<Vec<_>>(),
            gold.quality.values().collect::<Vec<_>>(),
            gold.rolling.values().collect::<Vec<_>>(),
        ))
        .map_err(|e| StoreError::Query(format!("fingerprint serialization: {e}")))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

fn destination_of(record: &RawRecord, dimension: Dimension) -> Option<String> {
    match dimension {
        Dimension::Country => Some(normalize_key(&record.destination_country)),
        Dimension::Region => record.destination_region.as_deref().map(normalize_key),
        Dimension::Port => record.port.as_deref().map(normalize_key),
    }
}

impl RawRecordStore for InMemoryStore {
    fn records_for(&self, commodity: &str, week: NaiveDate) -> Result<Vec<RawRecord>, StoreError> {
        let key = normalize_key(commodity);
        Ok(self
            .read(&self.silver)?
            .iter()
            .filter(|r| r.week_ending == week && normalize_key(&r.commodity) == key)
            .cloned()
            .collect())
    }

    fn distinct_commodities(&self, week: NaiveDate) -> Result<Vec<String>, StoreError> {
        let set: BTreeSet<String> = self
            .read(&self.silver)?
            .iter()
            .filter(|r| r.week_ending == week)
            .map(|r| normalize_key(&r.commodity))
            .collect();
        Ok(set.into_iter().collect())
    }

    fn distinct_destinations(
        &self,
        commodity: &str,
        week: NaiveDate,
        dimension: Dimension,
    ) -> Result<Vec<String>, StoreError> {
        let key = normalize_key(commodity);
        let set: BTreeSet<String> = self
            .read(&self.silver)?
            .iter()
            .filter(|r| r.week_ending == week && normalize_key(&r.commodity) == key)
            .filter(|r| validate_record(r).is_ok())
            .filter_map(|r| destination_of(r, dimension))
            .filter(|d| !d.is_empty())
            .collect();
        Ok(set.into_iter().collect())
    }

    fn distinct_weeks(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let set: BTreeSet<NaiveDate> = self
            .read(&self.silver)?
            .iter()
            .map(|r| r.week_ending)
            .filter(|w| start.map_or(true, |s| *w >= s) && end.map_or(true, |e| *w <= e))
            .collect();
        Ok(set.into_iter().collect())
    }

    fn all_records(&self) -> Result<Vec<RawRecord>, StoreError> {
        Ok(self.read(&self.silver)?.clone())
    }

    fn bronze_records(&self) -> Result<Vec<BronzeRecord>, StoreError> {
        Ok(self.read(&self.bronze)?.clone())
    }

    fn latest_ingestion(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.read(&self.bronze)?.iter().map(|b| b.ingested_on).max())
    }

    fn daily_series(&self) -> Result<Vec<String>, StoreError> {
        let set: BTreeSet<String> = self
            .read(&self.daily)?
            .iter()
            .map(|o| o.series.clone())
            .collect();
        Ok(set.into_iter().collect())
    }

    fn daily_observations(
        &self,
        series: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyObservation>, StoreError> {
        let mut rows: Vec<DailyObservation> = self
            .read(&self.daily)?
            .iter()
            .filter(|o| o.series == series && o.date >= start && o.date <= end)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.date);
        Ok(rows)
    }
}

impl SummaryStore for InMemoryStore {
    fn get_summary(
        &self,
        commodity: &str,
        week: NaiveDate,
    ) -> Result<Option<WeeklyCommoditySummary>, StoreError> {
        let key = SummaryKey {
            commodity: normalize_key(commodity),
            week_ending: week,
        };
        Ok(self.read(&self.gold)?.summaries.get(&key).cloned())
    }

    fn upsert_summary(&self, row: WeeklyCommoditySummary) -> Result<(), StoreError> {
        self.write(&self.gold)?.summaries.insert(row.key(), row);
        Ok(())
    }

    fn summaries_for(
        &self,
        commodity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeeklyCommoditySummary>, StoreError> {
        let key = normalize_key(commodity);
        Ok(self
            .read(&self.gold)?
            .summaries
            .values()
            .filter(|s| s.commodity == key && s.week_ending >= start && s.week_ending <= end)
            .cloned()
            .collect())
    }

    fn all_summaries(&self) -> Result<Vec<WeeklyCommoditySummary>, StoreError> {
        Ok(self.read(&self.gold)?.summaries.values().cloned().collect())
    }

    fn get_rollup(&self, key: &RollupKey) -> Result<Option<DestinationRollup>, StoreError> {
        Ok(self.read(&self.gold)?.rollups.get(key).cloned())
    }

    fn upsert_rollup(&self, row: DestinationRollup) -> Result<(), StoreError> {
        self.write(&self.gold)?.rollups.insert(row.key(), row);
        Ok(())
    }

    fn rollups_for(
        &self,
        commodity: &str,
        week: NaiveDate,
        dimension: Dimension,
    ) -> Result<Vec<DestinationRollup>, StoreError> {
        let key = normalize_key(commodity);
        Ok(self
            .read(&self.gold)?
            .rollups
            .values()
            .filter(|r| r.commodity == key && r.week_ending == week && r.dimension == dimension)
            .cloned()
            .collect())
    }

    fn get_class_exports(&self, key: &ClassKey) -> Result<Option<ClassExports>, StoreError> {
        Ok(self.read(&self.gold)?.classes.get(key).cloned())
    }

    fn upsert_class_exports(&self, row: ClassExports) -> Result<(), StoreError> {
        self.write(&self.gold)?.classes.insert(row.key(), row);
        Ok(())
    }

    fn class_exports_for(&self, week: NaiveDate) -> Result<Vec<ClassExports>, StoreError> {
        Ok(self
            .read(&self.gold)?
            .classes
            .values()
            .filter(|c| c.week_ending == week)
            .cloned()
            .collect())
    }

    fn get_quality(&self, key: &QualityKey) -> Result<Option<QualityStats>, StoreError> {
        Ok(self.read(&self.gold)?.quality.get(key).cloned())
    }

    fn upsert_quality(&self, row: QualityStats) -> Result<(), StoreError> {
        self.write(&self.gold)?.quality.insert(row.key(), row);
        Ok(())
    }

    fn get_rolling(&self, key: &RollingKey) -> Result<Option<RollingStat>, StoreError> {
        Ok(self.read(&self.gold)?.rolling.get(key).cloned())
    }

    fn upsert_rolling(&self, row: RollingStat) -> Result<(), StoreError> {
        self.write(&self.gold)?.rolling.insert(row.key(), row);
        Ok(())
    }

    fn all_rolling(&self) -> Result<Vec<RollingStat>, StoreError> {
        Ok(self.read(&self.gold)?.rolling.values().cloned().collect())
    }

    fn materialized_views(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read(&self.views)?.iter().cloned().collect())
    }
}
