//! BDD tests for layer verification.
//!
//! Each scenario materializes a small pipeline in the in-memory store
//! (bronze payloads, silver records, gold views via the scheduler) and runs
//! the standard suites against it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use grainlab_core::adapter;
use grainlab_core::domain::{BronzeRecord, DailyObservation};
use grainlab_core::{
    AggregationEngine, InMemoryStore, PeriodScheduler, PipelineConfig, SummaryStore,
};
use grainlab_runner::check::{CheckError, CheckResult, ConsistencyCheck, Layer, VerificationContext};
use grainlab_runner::suites::{bronze, build_suites, gold, gold_suite, silver_suite};
use grainlab_runner::{
    render_json, render_text, SourceClient, SourceError, TimeoutSourceClient, VerificationRunner,
};
use serde_json::json;

const SERIES: &str = "CORN_GULF_BASIS";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn payload(
    id: &str,
    week: &str,
    country: &str,
    region: &str,
    port: &str,
    pounds: f64,
) -> BronzeRecord {
    BronzeRecord {
        certificate_id: id.into(),
        ingested_on: date(2024, 9, 13),
        payload: json!({
            "commodity": "corn",
            "week_ending": week,
            "destination_country": country,
            "destination_region": region,
            "port": port,
            "pounds": pounds,
            "moisture": 14.2,
            "test_weight": 56.5,
        }),
    }
}

fn bronze() -> Vec<BronzeRecord> {
    vec![
        payload("A-1", "2024-09-05", "Japan", "Asia", "New Orleans", 1_000_000.0),
        payload("A-2", "2024-09-05", "Mexico", "Americas", "Houston", 500_000.0),
        payload("A-3", "2024-09-05", "Colombia", "Americas", "Tacoma", 250_000.0),
        payload("B-1", "2024-09-12", "Japan", "Asia", "New Orleans", 1_500_000.0),
        payload("B-2", "2024-09-12", "Mexico", "Americas", "Houston", 700_000.0),
        payload("B-3", "2024-09-12", "Taiwan", "Asia", "Kalama", 300_000.0),
    ]
}

/// Ten consecutive days of a daily series starting 2024-09-01.
fn daily() -> Vec<DailyObservation> {
    (0..10)
        .map(|i| DailyObservation {
            series: SERIES.into(),
            date: date(2024, 9, 1) + chrono::Duration::days(i),
            value: 0.5 + i as f64 * 0.25,
        })
        .collect()
}

struct Pipeline {
    store: Arc<InMemoryStore>,
    scheduler: PeriodScheduler,
    ctx: Arc<VerificationContext>,
}

fn pipeline_with(config: PipelineConfig) -> Pipeline {
    let config = Arc::new(config);
    let store = Arc::new(InMemoryStore::new());
    let bronze = bronze();
    let outcome = adapter::normalize(&bronze);
    assert!(outcome.failures.is_empty());
    store.insert_bronze(bronze).unwrap();
    store.insert_records(outcome.records).unwrap();
    store.insert_daily(daily()).unwrap();

    let engine = AggregationEngine::new(Arc::clone(&config), store.clone(), store.clone());
    let scheduler = PeriodScheduler::new(Arc::new(engine));
    assert!(scheduler.aggregate_all_weeks(None, None).unwrap().is_success());
    assert!(scheduler.aggregate_daily_series(None, None).unwrap().is_success());

    let ctx = Arc::new(VerificationContext::new(
        store.clone(),
        store.clone(),
        config,
        date(2024, 9, 14),
    ));
    Pipeline {
        store,
        scheduler,
        ctx,
    }
}

fn pipeline() -> Pipeline {
    pipeline_with(PipelineConfig::default_us())
}

fn run_all(ctx: &Arc<VerificationContext>) -> grainlab_runner::VerificationReport {
    VerificationRunner::new(build_suites(ctx, &Layer::ALL, None)).run()
}

/// Outcome fields that do not depend on wall-clock time.
fn outcome(result: &CheckResult) -> (bool, usize, usize, Vec<String>, Vec<String>) {
    (
        result.passed,
        result.records_checked,
        result.records_failed,
        result.errors.clone(),
        result.warnings.clone(),
    )
}

#[test]
fn bdd_clean_pipeline_passes_every_suite() {
    // GIVEN a fully aggregated pipeline
    let p = pipeline();

    // WHEN every suite runs
    let report = run_all(&p.ctx);

    // THEN every check passes
    let failures: Vec<_> = report.failed_checks().map(|r| (&r.name, &r.errors)).collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert!(report.passed);
    assert_eq!(report.tally.total, 3 + 3 + 6);
    assert_eq!(report.results(Layer::Gold).len(), 6);

    // AND with every fixture port mapped, coverage raises no warnings
    let coverage = report.find(gold::DimensionCoverage::NAME).unwrap();
    assert!(coverage.warnings.is_empty());
}

#[test]
fn bdd_scenario_c_rolling_recompute_and_missing_day() {
    // GIVEN ten days of a daily series with stored 7-day rolling rows
    let p = pipeline();
    let check = gold::RollingRecompute::new(Arc::clone(&p.ctx));

    // WHEN the stored rows are recomputed from silver
    let result = check.run().unwrap();

    // THEN every row matches within 0.01
    assert!(result.passed, "{:?}", result.errors);
    assert_eq!(result.records_checked, 10);

    // GIVEN one day then disappears from the silver series
    assert_eq!(p.store.remove_daily(SERIES, date(2024, 9, 8)).unwrap(), 1);

    // WHEN the check runs again
    let result = check.run().unwrap();

    // THEN it fails with a day-count mismatch
    assert!(!result.passed);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("day-count mismatch") && e.contains("2024-09-10")));
}

#[test]
fn bdd_rolling_rows_recomputed_after_gap_still_fail() {
    // GIVEN a series with a missing day that is re-aggregated afterwards
    let p = pipeline();
    p.store.remove_daily(SERIES, date(2024, 9, 8)).unwrap();
    p.scheduler.aggregate_daily_series(None, None).unwrap();

    // WHEN the rolling check runs
    let result = gold::RollingRecompute::new(Arc::clone(&p.ctx)).run().unwrap();

    // THEN the short windows are still reported
    assert!(!result.passed);
    assert!(result.errors[0].contains("expected 7 days, found 6"));
}

#[test]
fn bdd_removing_a_check_leaves_the_others_unchanged() {
    // GIVEN a pipeline with one missing view and a tampered alert flag
    let p = pipeline();
    p.store.drop_view("rolling_stats").unwrap();
    let mut row = p.store.get_summary("CORN", date(2024, 9, 12)).unwrap().unwrap();
    row.alert = !row.alert;
    p.store.upsert_summary(row).unwrap();

    // WHEN the gold suite runs with and without the views check
    let full = VerificationRunner::new(vec![gold_suite(&p.ctx)]).run();
    let mut reduced_suite = gold_suite(&p.ctx);
    assert!(reduced_suite.remove(gold::MaterializedViews::NAME));
    let reduced = VerificationRunner::new(vec![reduced_suite]).run();

    // THEN every remaining check has the same outcome
    assert_eq!(reduced.results(Layer::Gold).len(), 5);
    for result in reduced.results(Layer::Gold) {
        let same = full.find(&result.name).unwrap();
        assert_eq!(outcome(result), outcome(same), "{} changed", result.name);
    }
    assert!(!full.find(gold::MaterializedViews::NAME).unwrap().passed);
    assert!(!reduced.find(gold::AlertThresholds::NAME).unwrap().passed);
}

#[test]
fn bdd_unavailable_store_fails_checks_with_a_reason() {
    // GIVEN a store that has gone offline
    let p = pipeline();
    p.store.set_available(false);

    // WHEN every suite runs
    let report = run_all(&p.ctx);

    // THEN every check fails with a data-access diagnostic, none are skipped
    assert!(!report.passed);
    assert_eq!(report.tally.failed, report.tally.total);
    for result in report.suites.values().flatten() {
        assert!(
            result.errors[0].contains("check could not run: data access error"),
            "{}: {:?}",
            result.name,
            result.errors
        );
    }
}

struct Explodes;

impl ConsistencyCheck for Explodes {
    fn name(&self) -> &str {
        "gold_explodes"
    }

    fn layer(&self) -> Layer {
        Layer::Gold
    }

    fn run(&self) -> Result<CheckResult, CheckError> {
        panic!("index out of range in fixture");
    }
}

#[test]
fn bdd_panicking_check_is_contained() {
    // GIVEN a gold suite with a check that panics
    let p = pipeline();
    let suite = gold_suite(&p.ctx).with_check(Explodes);

    // WHEN the suite runs
    let report = VerificationRunner::new(vec![suite]).run();

    // THEN the panic becomes that check's failure and the others still pass
    let exploded = report.find("gold_explodes").unwrap();
    assert!(!exploded.passed);
    assert!(exploded.errors[0].contains("index out of range in fixture"));
    assert_eq!(report.tally.failed, 1);
    assert_eq!(report.tally.passed, 6);
}

struct FakeSource(HashMap<String, f64>);

impl SourceClient for FakeSource {
    fn fetch_pounds(&self, certificate_id: &str) -> Result<Option<f64>, SourceError> {
        Ok(self.0.get(certificate_id).copied())
    }
}

struct Stalls;

impl SourceClient for Stalls {
    fn fetch_pounds(&self, _: &str) -> Result<Option<f64>, SourceError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(Some(0.0))
    }
}

fn source_from_bronze(overrides: &[(&str, Option<f64>)]) -> FakeSource {
    let mut pounds: HashMap<String, f64> = adapter::normalize(&bronze())
        .records
        .into_iter()
        .map(|r| (r.certificate_id, r.pounds))
        .collect();
    for (id, value) in overrides {
        match value {
            Some(v) => pounds.insert(id.to_string(), *v),
            None => pounds.remove(*id),
        };
    }
    FakeSource(pounds)
}

#[test]
fn bdd_source_spot_check_agreement_threshold() {
    // GIVEN a source that disagrees on one certificate in six
    let p = pipeline();
    let one_off = source_from_bronze(&[("B-2", Some(710_000.0))]);

    // WHEN the bronze suite runs with that source
    let suite = bronze::SourceSpotCheck::new(Arc::clone(&p.ctx), Arc::new(one_off));
    let result = suite.run().unwrap();

    // THEN 5/6 agreement clears the 80% bar
    assert!(result.passed);
    assert_eq!(result.records_failed, 1);
    assert!(result.errors[0].contains("B-2"));

    // GIVEN a source missing two certificates
    let two_off = source_from_bronze(&[("A-1", None), ("B-3", None)]);
    let result = bronze::SourceSpotCheck::new(Arc::clone(&p.ctx), Arc::new(two_off))
        .run()
        .unwrap();

    // THEN 4/6 agreement fails
    assert!(!result.passed);
    assert!(result.errors.iter().any(|e| e.contains("not found at source")));
    assert!(result.errors.last().unwrap().contains("below required"));
}

#[test]
fn bdd_source_timeouts_are_failed_samples() {
    // GIVEN a source slower than the deadline
    let p = pipeline();
    let bounded = TimeoutSourceClient::new(Arc::new(Stalls), Duration::from_millis(20));

    // WHEN the spot check runs
    let result = bronze::SourceSpotCheck::new(Arc::clone(&p.ctx), Arc::new(bounded))
        .run()
        .unwrap();

    // THEN every sample failed on timeout and the check still returned
    assert!(!result.passed);
    assert_eq!(result.records_failed, 6);
    assert!(result.errors[0].contains("timed out"));
}

#[test]
fn bdd_duplicate_certificate_fails_zero_tolerance() {
    // GIVEN a certificate loaded into silver twice
    let p = pipeline();
    let dup = adapter::parse_payload(&bronze()[0]).unwrap();
    p.store.insert_records(vec![dup]).unwrap();

    // WHEN the silver suite runs
    let report = VerificationRunner::new(vec![silver_suite(&p.ctx)]).run();

    // THEN the duplicate-keys check fails naming the certificate
    let dups = report.find("silver_duplicate_keys").unwrap();
    assert!(!dups.passed);
    assert_eq!(dups.records_failed, 1);
    assert!(dups.errors[0].contains("A-1 appears 2 times"));
}

#[test]
fn bdd_tampered_gold_rows_are_reported_not_corrected() {
    // GIVEN a summary whose total and running total were overwritten
    let p = pipeline();
    let week = date(2024, 9, 5);
    let mut row = p.store.get_summary("CORN", week).unwrap().unwrap();
    row.total_pounds = 1_800_000.0;
    p.store.upsert_summary(row).unwrap();

    // WHEN the gold suite runs
    let report = VerificationRunner::new(vec![gold_suite(&p.ctx)]).run();

    // THEN reconciliation and the MY recurrence both fail
    let recon = report.find(gold::TotalReconciliation::NAME).unwrap();
    assert!(!recon.passed);
    assert!(recon.errors[0].contains("CORN 2024-09-05"));
    assert!(!report.find(gold::MyToDateRecurrence::NAME).unwrap().passed);

    // AND the stored row is untouched
    let stored = p.store.get_summary("CORN", week).unwrap().unwrap();
    assert_eq!(stored.total_pounds, 1_800_000.0);
}

#[test]
fn bdd_completeness_against_configured_calendar() {
    // GIVEN a calendar that starts one week before the first data
    let mut config = PipelineConfig::default_us();
    config.verification.calendar_start = Some(date(2024, 8, 29));
    let p = pipeline_with(config);

    // WHEN the bronze completeness check runs
    let result = bronze::Completeness::new(Arc::clone(&p.ctx)).run().unwrap();

    // THEN the missing week is named
    assert!(!result.passed);
    assert_eq!(result.records_checked, 3);
    assert_eq!(result.errors, vec!["no bronze data for week ending 2024-08-29"]);
}

#[test]
fn bdd_completeness_names_weeks_missing_after_data_stopped() {
    // GIVEN data stopped arriving three weeks before "today"
    let p = pipeline();
    let ctx = Arc::new(VerificationContext::new(
        p.store.clone(),
        p.store.clone(),
        Arc::clone(&p.ctx.config),
        date(2024, 10, 4),
    ));

    // WHEN the bronze completeness check runs
    let result = bronze::Completeness::new(ctx).run().unwrap();

    // THEN every trailing week through today is missing
    assert!(!result.passed);
    assert_eq!(result.records_checked, 5);
    assert_eq!(
        result.errors,
        vec![
            "no bronze data for week ending 2024-09-19",
            "no bronze data for week ending 2024-09-26",
            "no bronze data for week ending 2024-10-03",
        ]
    );
}

#[test]
fn bdd_stale_bronze_fails_freshness() {
    // GIVEN the last ingestion was a week before "today"
    let p = pipeline();
    let ctx = Arc::new(VerificationContext::new(
        p.store.clone(),
        p.store.clone(),
        Arc::clone(&p.ctx.config),
        date(2024, 9, 20),
    ));

    // WHEN freshness is checked
    let result = bronze::Freshness::new(ctx).run().unwrap();

    // THEN it fails
    assert!(!result.passed);
    assert!(result.errors[0].contains("older than 2024-09-19"));
}

#[test]
fn reports_render_as_text_and_json() {
    let p = pipeline();
    p.store.drop_view("class_exports").unwrap();
    let report = run_all(&p.ctx);

    let text = render_text(&report);
    assert!(text.contains("BRONZE suite: 3 check(s), 0 failed"));
    assert!(text.contains("GOLD suite: 6 check(s), 1 failed"));
    assert!(text.contains("[FAIL] gold_materialized_views"));
    assert!(text.contains("error: view class_exports does not exist"));
    assert!(text.contains("-> FAIL"));

    let json: serde_json::Value = serde_json::from_str(&render_json(&report).unwrap()).unwrap();
    assert_eq!(json["passed"], false);
    assert_eq!(json["tally"]["total"], 12);
    assert_eq!(json["suites"]["gold"].as_array().unwrap().len(), 6);
    assert_eq!(json["suites"]["gold"][1]["name"], "gold_materialized_views");
}
