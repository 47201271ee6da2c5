//! Standard bronze, silver and gold suites.

pub mod bronze;
pub mod gold;
pub mod silver;

use std::sync::Arc;
use std::time::Duration;

use crate::check::{Layer, VerificationContext};
use crate::runner::CheckSuite;
use crate::source::{SourceClient, TimeoutSourceClient};

/// Bronze suite. The source spot check is only registered when a client is supplied.
pub fn bronze_suite(
    ctx: &Arc<VerificationContext>,
    source: Option<Arc<dyn SourceClient>>,
) -> CheckSuite {
    let mut suite = CheckSuite::new(Layer::Bronze)
        .with_check(bronze::Completeness::new(Arc::clone(ctx)))
        .with_check(bronze::Freshness::new(Arc::clone(ctx)))
        .with_check(bronze::PayloadStructure::new(Arc::clone(ctx)));
    if let Some(source) = source {
        let timeout = Duration::from_secs(ctx.config.verification.source_timeout_secs);
        let bounded: Arc<dyn SourceClient> = Arc::new(TimeoutSourceClient::new(source, timeout));
        suite.add(bronze::SourceSpotCheck::new(Arc::clone(ctx), bounded));
    }
    suite
}

pub fn silver_suite(ctx: &Arc<VerificationContext>) -> CheckSuite {
    CheckSuite::new(Layer::Silver)
        .with_check(silver::TransformationAccuracy::new(Arc::clone(ctx)))
        .with_check(silver::DuplicateKeys::new(Arc::clone(ctx)))
        .with_check(silver::ValueRangeCheck::new(Arc::clone(ctx)))
}

pub fn gold_suite(ctx: &Arc<VerificationContext>) -> CheckSuite {
    CheckSuite::new(Layer::Gold)
        .with_check(gold::TotalReconciliation::new(Arc::clone(ctx)))
        .with_check(gold::MaterializedViews::new(Arc::clone(ctx)))
        .with_check(gold::RollingRecompute::new(Arc::clone(ctx)))
        .with_check(gold::DimensionCoverage::new(Arc::clone(ctx)))
        .with_check(gold::MyToDateRecurrence::new(Arc::clone(ctx)))
        .with_check(gold::AlertThresholds::new(Arc::clone(ctx)))
}

/// Suites for the requested layers, in bronze, silver, gold order.
pub fn build_suites(
    ctx: &Arc<VerificationContext>,
    layers: &[Layer],
    source: Option<Arc<dyn SourceClient>>,
) -> Vec<CheckSuite> {
    Layer::ALL
        .into_iter()
        .filter(|layer| layers.contains(layer))
        .map(|layer| match layer {
            Layer::Bronze => bronze_suite(ctx, source.clone()),
            Layer::Silver => silver_suite(ctx),
            Layer::Gold => gold_suite(ctx),
        })
        .collect()
}
