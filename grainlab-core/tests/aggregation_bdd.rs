//! BDD tests for weekly aggregation.
//!
//! These tests exercise the engine and scheduler end-to-end over the
//! in-memory store:
//! - Scenario A (first week of a marketing year)
//! - Scenario B (corrected record replaces, never accumulates)
//! - Idempotence, reconciliation and MY-to-date recurrence
//! - Failure scoping (store outage, unknown commodity)
//! - Marketing-year recalculation after an out-of-order correction
//! - CSV ingestion through the adapter boundary

use std::io::Write;
use std::sync::Arc;

use chrono::NaiveDate;
use grainlab_core::adapter;
use grainlab_core::domain::{Dimension, QualityFields, RawRecord};
use grainlab_core::schedule::UnitStatus;
use grainlab_core::{
    AggregationEngine, InMemoryStore, PeriodScheduler, PipelineConfig, SummaryStore,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn corn(id: &str, week: NaiveDate, country: &str, pounds: f64) -> RawRecord {
    RawRecord {
        certificate_id: id.into(),
        commodity: "CORN".into(),
        week_ending: week,
        destination_country: country.into(),
        destination_region: None,
        port: None,
        class: None,
        pounds,
        quality: QualityFields::default(),
    }
}

fn setup(records: Vec<RawRecord>) -> (Arc<InMemoryStore>, PeriodScheduler) {
    let store = Arc::new(InMemoryStore::new());
    store.insert_records(records).unwrap();
    let engine = AggregationEngine::new(
        Arc::new(PipelineConfig::default_us()),
        store.clone(),
        store.clone(),
    );
    (store, PeriodScheduler::new(Arc::new(engine)))
}

fn scenario_a() -> Vec<RawRecord> {
    let week = date(2024, 9, 5);
    vec![
        corn("A-1", week, "JAPAN", 1_000_000.0),
        corn("A-2", week, "MEXICO", 500_000.0),
        corn("A-3", week, "COLOMBIA", 250_000.0),
    ]
}

#[test]
fn bdd_scenario_a_first_week_of_marketing_year() {
    // GIVEN CORN certificates for week 2024-09-05 across three destinations
    let week = date(2024, 9, 5);
    let (store, scheduler) = setup(scenario_a());

    // WHEN the week is aggregated
    let report = scheduler.aggregate_week(week, None).unwrap();
    assert!(report.is_success());

    // THEN the summary total is 1,750,000 lb
    let summary = store.get_summary("CORN", week).unwrap().unwrap();
    assert_eq!(summary.total_pounds, 1_750_000.0);
    assert_eq!(summary.certificate_count, 3);

    // AND three country rollups sum to the same total
    let rollups = store.rollups_for("CORN", week, Dimension::Country).unwrap();
    assert_eq!(rollups.len(), 3);
    let sum: f64 = rollups.iter().map(|r| r.pounds).sum();
    assert_eq!(sum, 1_750_000.0);

    // AND my-to-date equals the week's own total (first week of MY 2024)
    assert_eq!(summary.marketing_year, 2024);
    assert_eq!(summary.my_to_date_pounds, 1_750_000.0);
}

#[test]
fn bdd_scenario_b_correction_replaces_previous_run() {
    // GIVEN Scenario A already aggregated
    let week = date(2024, 9, 5);
    let (store, scheduler) = setup(scenario_a());
    scheduler.aggregate_week(week, None).unwrap();

    // WHEN the MEXICO certificate is corrected to 1,200,000 lb and the week re-runs
    store
        .replace_record(corn("A-2", week, "MEXICO", 1_200_000.0))
        .unwrap();
    scheduler.aggregate_week(week, None).unwrap();

    // THEN the total is replaced, not summed with the previous run
    let summary = store.get_summary("CORN", week).unwrap().unwrap();
    assert_eq!(summary.total_pounds, 1_950_000.0);
    assert_eq!(summary.my_to_date_pounds, 1_950_000.0);

    // AND exactly one MEXICO rollup row exists
    let mexico: Vec<_> = store
        .rollups_for("CORN", week, Dimension::Country)
        .unwrap()
        .into_iter()
        .filter(|r| r.destination == "MEXICO")
        .collect();
    assert_eq!(mexico.len(), 1);
    assert_eq!(mexico[0].pounds, 1_200_000.0);
}

#[test]
fn bdd_scenario_rerun_is_idempotent() {
    // GIVEN Scenario A aggregated once
    let week = date(2024, 9, 5);
    let (store, scheduler) = setup(scenario_a());
    scheduler.aggregate_week(week, None).unwrap();
    let first = store.fingerprint().unwrap();
    let rollups = store.rollup_count().unwrap();

    // WHEN the same week is aggregated again with unchanged input
    scheduler.aggregate_week(week, None).unwrap();

    // THEN the gold layer is byte-for-byte the same
    assert_eq!(store.fingerprint().unwrap(), first);
    assert_eq!(store.rollup_count().unwrap(), rollups);
}

#[test]
fn bdd_scenario_my_to_date_recurrence_across_weeks() {
    // GIVEN four consecutive CORN weeks straddling the September MY boundary
    let weeks = [
        date(2024, 8, 22),
        date(2024, 8, 29),
        date(2024, 9, 5),
        date(2024, 9, 12),
    ];
    let records: Vec<RawRecord> = weeks
        .iter()
        .enumerate()
        .map(|(i, w)| corn(&format!("W-{i}"), *w, "JAPAN", 100.0 * (i + 1) as f64))
        .collect();
    let (store, scheduler) = setup(records);

    // WHEN all weeks are aggregated
    let report = scheduler.aggregate_all_weeks(None, None).unwrap();
    assert!(report.is_success());

    // THEN my_to_date(n) = my_to_date(n-1) + total(n) within a marketing year
    let rows = store.all_summaries().unwrap();
    let aug_29 = rows.iter().find(|r| r.week_ending == weeks[1]).unwrap();
    let sep_05 = rows.iter().find(|r| r.week_ending == weeks[2]).unwrap();
    let sep_12 = rows.iter().find(|r| r.week_ending == weeks[3]).unwrap();
    assert_eq!(aug_29.my_to_date_pounds, 300.0);
    // AND the first week of the new marketing year starts over
    assert_eq!(sep_05.my_to_date_pounds, sep_05.total_pounds);
    assert_eq!(
        sep_12.my_to_date_pounds,
        sep_05.my_to_date_pounds + sep_12.total_pounds
    );
}

#[test]
fn bdd_scenario_port_region_policy_keeps_country_complete() {
    // GIVEN one shipment from a mapped port and one from an unmapped port
    let week = date(2024, 9, 5);
    let mut mapped = corn("P-1", week, "JAPAN", 700.0);
    mapped.port = Some("Tacoma".into());
    let mut unmapped = corn("P-2", week, "KOREA", 300.0);
    unmapped.port = Some("Unlisted Landing".into());
    let (store, scheduler) = setup(vec![mapped, unmapped]);

    // WHEN the week is aggregated
    scheduler.aggregate_week(week, None).unwrap();

    // THEN the port-region view only carries the mapped port
    let ports = store.rollups_for("CORN", week, Dimension::Port).unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].destination, "PUGET SOUND");

    // AND the country view still reconciles to the full total
    let countries: f64 = store
        .rollups_for("CORN", week, Dimension::Country)
        .unwrap()
        .iter()
        .map(|r| r.pounds)
        .sum();
    assert_eq!(countries, 1_000.0);
}

#[test]
fn bdd_scenario_store_outage_marks_units_failed() {
    // GIVEN data for a week and a store that goes offline
    let week = date(2024, 9, 5);
    let (store, scheduler) = setup(scenario_a());
    store.set_available(false);

    // WHEN the week is aggregated with an explicit commodity list
    let report = scheduler
        .aggregate_week(week, Some(&["CORN".to_string()]))
        .unwrap();

    // THEN the unit is reported failed with a data-access reason
    assert_eq!(report.units.len(), 1);
    match &report.units[0].status {
        UnitStatus::Failed { reason } => assert!(reason.contains("data access")),
        other => panic!("expected failure, got {other:?}"),
    }

    // AND discovery itself surfaces the outage as an error
    assert!(scheduler.aggregate_week(week, None).is_err());
}

#[test]
fn bdd_scenario_recalculate_repairs_out_of_order_correction() {
    // GIVEN three aggregated weeks
    let weeks = [date(2024, 9, 5), date(2024, 9, 12), date(2024, 9, 19)];
    let records: Vec<RawRecord> = weeks
        .iter()
        .enumerate()
        .map(|(i, w)| corn(&format!("R-{i}"), *w, "JAPAN", 100.0))
        .collect();
    let (store, scheduler) = setup(records);
    scheduler.aggregate_all_weeks(None, None).unwrap();

    // WHEN week one is corrected and only week one is re-aggregated
    store
        .replace_record(corn("R-0", weeks[0], "JAPAN", 400.0))
        .unwrap();
    scheduler.aggregate_week(weeks[0], None).unwrap();
    let stale = store.get_summary("CORN", weeks[2]).unwrap().unwrap();
    assert_eq!(stale.my_to_date_pounds, 300.0);

    // THEN recalculation rewrites the drifted later weeks
    let rewritten = scheduler
        .recalculate_marketing_year_totals(2024, "corn")
        .unwrap();
    assert_eq!(rewritten, 2);
    let fixed = store.get_summary("CORN", weeks[2]).unwrap().unwrap();
    assert_eq!(fixed.my_to_date_pounds, 600.0);

    // AND a second recalculation has nothing left to do
    assert_eq!(
        scheduler
            .recalculate_marketing_year_totals(2024, "CORN")
            .unwrap(),
        0
    );
}

#[test]
fn bdd_scenario_recalculate_unknown_commodity_is_config_error() {
    let (_store, scheduler) = setup(vec![]);
    let err = scheduler
        .recalculate_marketing_year_totals(2024, "KALE")
        .unwrap_err();
    assert!(err.to_string().contains("KALE"));
}

#[test]
fn bdd_scenario_csv_ingest_to_gold() {
    // GIVEN a certificate CSV export on disk
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "certificate_id,commodity,week_ending,destination_country,\
         destination_region,port,class,pounds,protein\n\
         C1,Wheat,2024-06-06,Egypt,Africa,Houston,HRW,\"600,000\",12.5\n\
         C2,Wheat,2024-06-06,Japan,Asia,Portland,SW,400000,\n\
         C3,Wheat,2024-06-06,,Asia,Portland,SW,1,"
    )
    .unwrap();

    // WHEN it is loaded, normalized and aggregated
    let bronze = adapter::load_bronze_csv(file.path(), date(2024, 6, 7)).unwrap();
    let outcome = adapter::normalize(&bronze);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.failures.len(), 1);

    let store = Arc::new(InMemoryStore::new());
    store.insert_bronze(bronze).unwrap();
    store.insert_records(outcome.records).unwrap();
    let engine = AggregationEngine::new(
        Arc::new(PipelineConfig::default_us()),
        store.clone(),
        store.clone(),
    );
    let scheduler = PeriodScheduler::new(Arc::new(engine));
    let report = scheduler.aggregate_all_weeks(None, None).unwrap();
    assert!(report.is_success());

    // THEN the wheat summary and class rollups are populated
    let week = date(2024, 6, 6);
    let summary = store.get_summary("WHEAT", week).unwrap().unwrap();
    assert_eq!(summary.total_pounds, 1_000_000.0);
    assert_eq!(summary.marketing_year, 2024);
    let classes = store.class_exports_for(week).unwrap();
    assert_eq!(classes.len(), 2);
}
