//! Marketing-year calendar and unit conversion.
//!
//! A marketing year (MY) is a 12-month accounting year that starts on the
//! first day of a commodity-specific month. MY 2024 for corn runs from
//! 2024-09-01 through 2025-08-31; for wheat from 2024-06-01 through
//! 2025-05-31.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};

use crate::config::{normalize_key, CommodityCalendar, PipelineConfig};
use crate::error::ConfigurationError;

/// Pounds to metric tons.
pub const POUNDS_TO_METRIC_TONS: f64 = 0.000_453_592_37;

/// Days between a week-ending date and the same week one year earlier.
pub const YEAR_AGO_DAYS: i64 = 364;

/// Resolves marketing years and conversion factors for configured commodities.
///
/// All lookups are pure. An unknown commodity yields a `ConfigurationError`
/// naming that commodity; other commodities are unaffected.
#[derive(Debug, Clone)]
pub struct MarketingYearResolver {
    calendars: BTreeMap<String, CommodityCalendar>,
}

impl MarketingYearResolver {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            calendars: config
                .commodities
                .iter()
                .map(|(k, v)| (normalize_key(k), *v))
                .collect(),
        }
    }

    fn calendar(&self, commodity: &str) -> Result<&CommodityCalendar, ConfigurationError> {
        let key = normalize_key(commodity);
        let calendar =
            self.calendars
                .get(&key)
                .ok_or_else(|| ConfigurationError::UnknownCommodity {
                    commodity: key.clone(),
                })?;
        if !(1..=12).contains(&calendar.start_month) {
            return Err(ConfigurationError::InvalidStartMonth {
                commodity: key,
                month: calendar.start_month,
            });
        }
        Ok(calendar)
    }

    /// Calendar year in which the marketing year containing `date` begins.
    pub fn get_marketing_year(
        &self,
        commodity: &str,
        date: NaiveDate,
    ) -> Result<i32, ConfigurationError> {
        let calendar = self.calendar(commodity)?;
        if date.month() >= calendar.start_month {
            Ok(date.year())
        } else {
            Ok(date.year() - 1)
        }
    }

    /// First day of marketing year `year`.
    pub fn marketing_year_start(
        &self,
        commodity: &str,
        year: i32,
    ) -> Result<NaiveDate, ConfigurationError> {
        let calendar = self.calendar(commodity)?;
        NaiveDate::from_ymd_opt(year, calendar.start_month, 1).ok_or_else(|| {
            ConfigurationError::InvalidStartMonth {
                commodity: normalize_key(commodity),
                month: calendar.start_month,
            }
        })
    }

    /// Inclusive first and last day of marketing year `year`.
    pub fn marketing_year_range(
        &self,
        commodity: &str,
        year: i32,
    ) -> Result<(NaiveDate, NaiveDate), ConfigurationError> {
        let start = self.marketing_year_start(commodity, year)?;
        let next = self.marketing_year_start(commodity, year + 1)?;
        Ok((start, next - Duration::days(1)))
    }

    /// Pounds per bushel for the commodity.
    pub fn get_conversion_factor(&self, commodity: &str) -> Result<f64, ConfigurationError> {
        let calendar = self.calendar(commodity)?;
        if !(calendar.pounds_per_bushel.is_finite() && calendar.pounds_per_bushel > 0.0) {
            return Err(ConfigurationError::InvalidConversionFactor {
                commodity: normalize_key(commodity),
                factor: calendar.pounds_per_bushel,
            });
        }
        Ok(calendar.pounds_per_bushel)
    }
}

/// Week-ending date of the preceding reporting week.
pub fn prior_week(week: NaiveDate) -> NaiveDate {
    week - Duration::days(7)
}

/// Week-ending date of the same reporting week one year earlier.
pub fn year_ago_week(week: NaiveDate) -> NaiveDate {
    week - Duration::days(YEAR_AGO_DAYS)
}

/// Every week-ending date from `first` through `last`, stepping seven days.
pub fn expected_weeks(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    let mut weeks = Vec::new();
    let mut week = first;
    while week <= last {
        weeks.push(week);
        week += Duration::days(7);
    }
    weeks
}

/// Percent change from `previous` to `current`; `None` when there is no base.
pub fn pct_change(previous: Option<f64>, current: f64) -> Option<f64> {
    match previous {
        Some(prev) if prev != 0.0 && prev.is_finite() => Some((current - prev) / prev * 100.0),
        _ => None,
    }
}
