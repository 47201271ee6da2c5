//! grainlab CLI: aggregation, marketing-year recalculation and verification.
//!
//! Commands:
//! - `aggregate` loads a certificate CSV and materializes every gold view
//! - `recalc` re-derives marketing-year-to-date totals for one commodity
//! - `verify` aggregates, then runs the bronze/silver/gold suites

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use grainlab_core::adapter;
use grainlab_core::schedule::UnitStatus;
use grainlab_core::{
    AggregationEngine, Cancellation, InMemoryStore, PeriodScheduler, PipelineConfig,
    ScheduleReport,
};
use grainlab_runner::check::{Layer, VerificationContext};
use grainlab_runner::{
    build_suites, render_json, render_text, HttpSourceClient, SourceClient, VerificationRunner,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "grainlab",
    version,
    about = "Bronze/silver/gold aggregation and verification for grain inspection data"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Inputs shared by every command.
#[derive(clap::Args)]
struct InputArgs {
    /// Certificate CSV export (one certificate per row).
    #[arg(long)]
    input: PathBuf,

    /// Pipeline configuration TOML. Defaults to the built-in US calendar.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Daily series CSV (`series,date,value`) for rolling statistics.
    #[arg(long)]
    daily: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate every week with data into the gold views.
    Aggregate {
        #[command(flatten)]
        input: InputArgs,

        /// First week-ending date (YYYY-MM-DD). Defaults to the earliest observed.
        #[arg(long)]
        start: Option<String>,

        /// Last week-ending date (YYYY-MM-DD). Defaults to the latest observed.
        #[arg(long)]
        end: Option<String>,

        /// Stop starting new units after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Print the schedule report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Re-derive marketing-year-to-date totals for one commodity.
    Recalc {
        #[command(flatten)]
        input: InputArgs,

        /// Marketing year (calendar year in which it begins).
        #[arg(long)]
        year: i32,

        #[arg(long)]
        commodity: String,
    },
    /// Aggregate, then verify the layers.
    Verify {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long, value_enum, default_value_t = LayerArg::All)]
        layer: LayerArg,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Base URL of the original certificate source; enables the spot check.
        #[arg(long)]
        source_url: Option<String>,

        /// Reference date for freshness (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        today: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LayerArg {
    Bronze,
    Silver,
    Gold,
    All,
}

impl LayerArg {
    fn layers(self) -> Vec<Layer> {
        match self {
            Self::Bronze => vec![Layer::Bronze],
            Self::Silver => vec![Layer::Silver],
            Self::Gold => vec![Layer::Gold],
            Self::All => Layer::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ok = match cli.command {
        Commands::Aggregate {
            input,
            start,
            end,
            deadline_secs,
            json,
        } => run_aggregate(&input, start.as_deref(), end.as_deref(), deadline_secs, json)?,
        Commands::Recalc {
            input,
            year,
            commodity,
        } => run_recalc(&input, year, &commodity)?,
        Commands::Verify {
            input,
            layer,
            format,
            source_url,
            today,
        } => run_verify(&input, layer, format, source_url, today.as_deref())?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

// ─── Loading ─────────────────────────────────────────────────────────

struct Loaded {
    config: Arc<PipelineConfig>,
    store: Arc<InMemoryStore>,
}

impl Loaded {
    fn scheduler(&self) -> PeriodScheduler {
        let engine = AggregationEngine::new(
            Arc::clone(&self.config),
            self.store.clone(),
            self.store.clone(),
        );
        PeriodScheduler::new(Arc::new(engine))
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date '{raw}'"))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(PipelineConfig::default_us()),
    }
}

fn load(args: &InputArgs) -> Result<Loaded> {
    let config = load_config(args.config.as_deref())?;
    let store = Arc::new(InMemoryStore::new());

    let today = chrono::Local::now().date_naive();
    let bronze = adapter::load_bronze_csv(&args.input, today)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let outcome = adapter::normalize(&bronze);
    for failure in outcome.failures.iter().take(5) {
        warn!(error = %failure, "payload skipped");
    }
    info!(
        bronze = bronze.len(),
        silver = outcome.records.len(),
        skipped = outcome.failures.len(),
        "certificates loaded"
    );
    store.insert_bronze(bronze)?;
    store.insert_records(outcome.records)?;

    if let Some(path) = &args.daily {
        let daily = adapter::load_daily_csv(path)
            .with_context(|| format!("reading {}", path.display()))?;
        info!(observations = daily.len(), "daily series loaded");
        store.insert_daily(daily)?;
    }

    Ok(Loaded {
        config: Arc::new(config),
        store,
    })
}

/// Aggregate every week and daily series; logs failed units.
fn aggregate_everything(
    scheduler: &PeriodScheduler,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<ScheduleReport> {
    let mut report = scheduler.aggregate_all_weeks(start, end)?;
    let daily = scheduler.aggregate_daily_series(None, None)?;
    report.units.extend(daily.units);
    report.cancelled |= daily.cancelled;

    for unit in report.failed() {
        if let UnitStatus::Failed { reason } = &unit.status {
            warn!(scope = ?unit.scope, week = %unit.week, reason = %reason, "unit failed");
        }
    }
    Ok(report)
}

// ─── Commands ────────────────────────────────────────────────────────

fn run_aggregate(
    args: &InputArgs,
    start: Option<&str>,
    end: Option<&str>,
    deadline_secs: Option<u64>,
    json: bool,
) -> Result<bool> {
    let start = start.map(parse_date).transpose()?;
    let end = end.map(parse_date).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            bail!("--start {s} is after --end {e}");
        }
    }

    let loaded = load(args)?;
    let mut scheduler = loaded.scheduler();
    if let Some(secs) = deadline_secs {
        let deadline = Cancellation::with_deadline(Duration::from_secs(secs));
        scheduler = scheduler.with_cancellation(Arc::new(deadline));
    }
    let report = aggregate_everything(&scheduler, start, end)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let total = report.total();
        println!(
            "{} unit(s) succeeded, {} failed{}",
            report.succeeded(),
            report.failed().count(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        println!(
            "rows written: {}, records skipped: {}, keys failed: {}",
            total.rows_written, total.records_skipped, total.keys_failed
        );
    }
    Ok(report.is_success())
}

fn run_recalc(args: &InputArgs, year: i32, commodity: &str) -> Result<bool> {
    let loaded = load(args)?;
    let scheduler = loaded.scheduler();
    let report = aggregate_everything(&scheduler, None, None)?;
    if !report.is_success() {
        warn!("aggregation had failures; recalculating over what was written");
    }

    let rewritten = scheduler
        .recalculate_marketing_year_totals(year, commodity)
        .with_context(|| format!("recalculating {commodity} marketing year {year}"))?;
    println!("{commodity} MY {year}: {rewritten} row(s) rewritten");
    Ok(report.is_success())
}

fn run_verify(
    args: &InputArgs,
    layer: LayerArg,
    format: Format,
    source_url: Option<String>,
    today: Option<&str>,
) -> Result<bool> {
    let today = match today {
        Some(raw) => parse_date(raw)?,
        None => chrono::Local::now().date_naive(),
    };
    let loaded = load(args)?;
    aggregate_everything(&loaded.scheduler(), None, None)?;

    let source: Option<Arc<dyn SourceClient>> = match source_url {
        Some(url) => {
            let timeout = Duration::from_secs(loaded.config.verification.source_timeout_secs);
            Some(Arc::new(HttpSourceClient::new(url, timeout)?))
        }
        None => None,
    };

    let ctx = Arc::new(VerificationContext::new(
        loaded.store.clone(),
        loaded.store.clone(),
        Arc::clone(&loaded.config),
        today,
    ));
    let report = VerificationRunner::new(build_suites(&ctx, &layer.layers(), source)).run();

    match format {
        Format::Text => print!("{}", render_text(&report)),
        Format::Json => println!("{}", render_json(&report)?),
    }
    Ok(report.passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "certificate_id,commodity,week_ending,destination_country,pounds";

    fn input_file(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file
    }

    fn args(file: &tempfile::NamedTempFile) -> InputArgs {
        InputArgs {
            input: file.path().to_path_buf(),
            config: None,
            daily: None,
        }
    }

    #[test]
    fn recalc_succeeds_when_every_unit_aggregates() {
        let file = input_file(&["C-1,CORN,2024-09-05,JAPAN,100", "C-2,CORN,2024-09-12,JAPAN,50"]);
        assert!(run_recalc(&args(&file), 2024, "CORN").unwrap());
    }

    #[test]
    fn recalc_reports_failure_when_a_unit_failed() {
        // KALE has no marketing-year calendar, so its unit fails.
        let file = input_file(&["C-1,CORN,2024-09-05,JAPAN,100", "K-1,KALE,2024-09-05,JAPAN,5"]);
        assert!(!run_recalc(&args(&file), 2024, "CORN").unwrap());
    }
}
