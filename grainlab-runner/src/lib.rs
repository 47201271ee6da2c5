//! Layer verification for the grainlab pipeline.
//!
//! Checks are grouped into bronze, silver and gold suites and executed by
//! the `VerificationRunner`, which renders a text or JSON report.

pub mod check;
pub mod reporting;
pub mod runner;
pub mod sampling;
pub mod source;
pub mod suites;

pub use check::{CheckError, CheckResult, ConsistencyCheck, Layer, VerificationContext};
pub use reporting::{render_json, render_text};
pub use runner::{CheckSuite, RunState, Tally, VerificationReport, VerificationRunner};
pub use source::{HttpSourceClient, SourceClient, SourceError, TimeoutSourceClient};
pub use suites::build_suites;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: checks and their context can cross rayon workers.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<VerificationContext>();
        require_sync::<VerificationContext>();
        require_send::<CheckResult>();
        require_sync::<CheckResult>();
        require_send::<CheckSuite>();
        require_sync::<CheckSuite>();
        require_send::<HttpSourceClient>();
        require_sync::<HttpSourceClient>();
        require_send::<TimeoutSourceClient>();
        require_sync::<TimeoutSourceClient>();
        require_send::<suites::gold::RollingRecompute>();
        require_sync::<suites::gold::RollingRecompute>();
    }
}
