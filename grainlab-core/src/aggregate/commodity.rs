//! Weekly commodity summary with week-over-week, year-over-year and
//! marketing-year-to-date figures.

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use super::{AggregationEngine, UnitTally};
use crate::calendar::{pct_change, prior_week, year_ago_week, POUNDS_TO_METRIC_TONS};
use crate::config::normalize_key;
use crate::domain::WeeklyCommoditySummary;
use crate::error::AggregationError;

/// Whether a week-over-week change crosses the alert threshold.
pub fn crosses_alert_threshold(wow_change_pct: Option<f64>, threshold_pct: f64) -> bool {
    wow_change_pct.is_some_and(|pct| pct.abs() >= threshold_pct)
}

impl AggregationEngine {
    /// Compute and upsert the summary row for `(commodity, week)`.
    ///
    /// Comparisons read the *persisted* prior-week, year-ago and earlier
    /// marketing-year rows, so weeks must be processed in ascending order
    /// for the marketing-year running total to be correct.
    pub fn aggregate_commodity(
        &self,
        week: NaiveDate,
        commodity: &str,
    ) -> Result<UnitTally, AggregationError> {
        let commodity = normalize_key(commodity);

        // Configuration first: an unknown commodity must not touch the store.
        let marketing_year = self.resolver.get_marketing_year(&commodity, week)?;
        let my_start = self.resolver.marketing_year_start(&commodity, marketing_year)?;
        let pounds_per_bushel = self.resolver.get_conversion_factor(&commodity)?;

        let valid = self.load_valid(&commodity, week)?;
        let mut tally = UnitTally {
            records_skipped: valid.skipped,
            ..UnitTally::default()
        };
        if valid.records.is_empty() {
            debug!(commodity = %commodity, week = %week, "no valid records; summary not written");
            return Ok(tally);
        }

        let total_pounds: f64 = valid.records.iter().map(|r| r.pounds).sum();
        let prior = self
            .summaries
            .get_summary(&commodity, prior_week(week))?
            .map(|s| s.total_pounds);
        let year_ago = self
            .summaries
            .get_summary(&commodity, year_ago_week(week))?
            .map(|s| s.total_pounds);
        let earlier_in_year: f64 = self
            .summaries
            .summaries_for(&commodity, my_start, week - Duration::days(1))?
            .iter()
            .map(|s| s.total_pounds)
            .sum();

        let wow = pct_change(prior, total_pounds);
        let yoy = pct_change(year_ago, total_pounds);

        let mut row = self
            .summaries
            .get_summary(&commodity, week)?
            .unwrap_or_else(|| WeeklyCommoditySummary::new(commodity.clone(), week));
        row.marketing_year = marketing_year;
        row.total_pounds = total_pounds;
        row.total_bushels = total_pounds / pounds_per_bushel;
        row.total_metric_tons = total_pounds * POUNDS_TO_METRIC_TONS;
        row.certificate_count = valid.records.len();
        row.prior_week_pounds = prior;
        row.year_ago_pounds = year_ago;
        row.wow_change_pct = wow;
        row.yoy_change_pct = yoy;
        row.alert = crosses_alert_threshold(wow, self.config.alert_threshold_pct);
        row.my_to_date_pounds = earlier_in_year + total_pounds;

        if row.alert {
            info!(
                commodity = %commodity,
                week = %week,
                wow_change_pct = wow.unwrap_or_default(),
                "week-over-week change crossed alert threshold"
            );
        }
        self.summaries.upsert_summary(row)?;
        tally.rows_written = 1;

        debug!(
            commodity = %commodity,
            week = %week,
            total_pounds,
            certificates = valid.records.len(),
            "commodity summary upserted"
        );
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::ConfigurationError;
    use crate::store::SummaryStore;

    #[test]
    fn threshold_is_inclusive_and_symmetric() {
        assert!(crosses_alert_threshold(Some(25.0), 25.0));
        assert!(crosses_alert_threshold(Some(-30.0), 25.0));
        assert!(!crosses_alert_threshold(Some(24.9), 25.0));
        assert!(!crosses_alert_threshold(None, 25.0));
    }

    #[test]
    fn summary_sums_pounds_and_converts_units() {
        let week = date(2024, 9, 5);
        let (store, engine) = engine_with(vec![
            record("1", "CORN", week, "JAPAN", 56_000.0),
            record("2", "CORN", week, "MEXICO", 112_000.0),
        ]);

        let tally = engine.aggregate_commodity(week, "corn").unwrap();
        assert_eq!(tally.rows_written, 1);

        let row = store.get_summary("CORN", week).unwrap().unwrap();
        assert_eq!(row.total_pounds, 168_000.0);
        assert_eq!(row.total_bushels, 3_000.0);
        assert!((row.total_metric_tons - 168_000.0 * POUNDS_TO_METRIC_TONS).abs() < 1e-9);
        assert_eq!(row.certificate_count, 2);
        assert_eq!(row.marketing_year, 2024);
        assert_eq!(row.prior_week_pounds, None);
        assert!(!row.alert);
    }

    #[test]
    fn week_over_week_uses_persisted_prior_week() {
        let w1 = date(2024, 9, 5);
        let w2 = date(2024, 9, 12);
        let (store, engine) = engine_with(vec![
            record("1", "CORN", w1, "JAPAN", 100.0),
            record("2", "CORN", w2, "JAPAN", 150.0),
        ]);
        engine.aggregate_commodity(w1, "CORN").unwrap();
        engine.aggregate_commodity(w2, "CORN").unwrap();

        let row = store.get_summary("CORN", w2).unwrap().unwrap();
        assert_eq!(row.prior_week_pounds, Some(100.0));
        assert_eq!(row.wow_change_pct, Some(50.0));
        assert!(row.alert);
        assert_eq!(row.my_to_date_pounds, 250.0);
    }

    #[test]
    fn running_total_resets_at_marketing_year_boundary() {
        let august = date(2024, 8, 29);
        let september = date(2024, 9, 5);
        let (store, engine) = engine_with(vec![
            record("1", "CORN", august, "JAPAN", 400.0),
            record("2", "CORN", september, "JAPAN", 100.0),
        ]);
        engine.aggregate_commodity(august, "CORN").unwrap();
        engine.aggregate_commodity(september, "CORN").unwrap();

        let row = store.get_summary("CORN", september).unwrap().unwrap();
        assert_eq!(row.marketing_year, 2024);
        assert_eq!(row.my_to_date_pounds, 100.0);
        // Prior week still crosses the boundary for week-over-week.
        assert_eq!(row.prior_week_pounds, Some(400.0));
    }

    #[test]
    fn unknown_commodity_is_configuration_error() {
        let week = date(2024, 9, 5);
        let (store, engine) = engine_with(vec![record("1", "KALE", week, "JAPAN", 1.0)]);
        let err = engine.aggregate_commodity(week, "KALE").unwrap_err();
        assert_eq!(
            err,
            AggregationError::Config(ConfigurationError::UnknownCommodity {
                commodity: "KALE".into()
            })
        );
        assert!(store.get_summary("KALE", week).unwrap().is_none());
    }

    #[test]
    fn empty_week_writes_nothing() {
        let (store, engine) = engine_with(vec![]);
        let week = date(2024, 9, 5);
        let tally = engine.aggregate_commodity(week, "CORN").unwrap();
        assert_eq!(tally, UnitTally::default());
        assert!(store.get_summary("CORN", week).unwrap().is_none());
    }

    #[test]
    fn store_outage_propagates() {
        let week = date(2024, 9, 5);
        let (store, engine) = engine_with(vec![record("1", "CORN", week, "JAPAN", 1.0)]);
        store.set_available(false);
        let err = engine.aggregate_commodity(week, "CORN").unwrap_err();
        assert!(matches!(err, AggregationError::Store(_)));
    }
}
