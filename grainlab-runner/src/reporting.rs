//! Text and JSON renderings of a `VerificationReport`.

use std::fmt::Write as _;

use crate::check::CheckResult;
use crate::runner::VerificationReport;

/// Diagnostics shown per check in the text report.
pub const TEXT_SAMPLES: usize = 5;

/// Compact, indented, human-readable report.
pub fn render_text(report: &VerificationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Verification report ({} .. {})",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.finished_at.format("%H:%M:%S")
    );

    for (layer, results) in &report.suites {
        let failed = results.iter().filter(|r| !r.passed).count();
        let _ = writeln!(
            out,
            "\n{} suite: {} check(s), {} failed",
            layer.as_str().to_uppercase(),
            results.len(),
            failed
        );
        for result in results {
            render_check(&mut out, result);
        }
    }

    let _ = writeln!(out);
    if report.cancelled {
        let _ = writeln!(out, "Run cancelled; unstarted checks were not run.");
    }
    let _ = writeln!(
        out,
        "Total: {} passed, {} failed of {} -> {}",
        report.tally.passed,
        report.tally.failed,
        report.tally.total,
        if report.passed { "PASS" } else { "FAIL" }
    );
    out
}

fn render_check(out: &mut String, result: &CheckResult) {
    let _ = writeln!(
        out,
        "  [{}] {:<32} {:>6.1}% ({}/{}) {}ms",
        if result.passed { "PASS" } else { "FAIL" },
        result.name,
        result.pass_rate() * 100.0,
        result.records_passed,
        result.records_checked,
        result.duration_ms
    );
    sample_lines(out, "error", &result.errors);
    sample_lines(out, "warning", &result.warnings);
}

fn sample_lines(out: &mut String, label: &str, lines: &[String]) {
    for line in lines.iter().take(TEXT_SAMPLES) {
        let _ = writeln!(out, "      {label}: {line}");
    }
    if lines.len() > TEXT_SAMPLES {
        let _ = writeln!(out, "      ... {} more {label}(s)", lines.len() - TEXT_SAMPLES);
    }
}

/// The same content as a JSON document.
pub fn render_json(report: &VerificationReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::Layer;
    use crate::runner::Tally;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn report() -> VerificationReport {
        let mut ok = CheckResult::new("silver_duplicate_keys", Layer::Silver);
        ok.record_pass();
        let ok = ok.finish_zero_tolerance();

        let mut bad = CheckResult::new("silver_value_ranges", Layer::Silver);
        for i in 0..8 {
            bad.record_failure(format!("certificate C-{i}: pounds -1"));
        }
        let bad = bad.finish_zero_tolerance();

        let mut suites = BTreeMap::new();
        suites.insert(Layer::Silver, vec![ok, bad]);
        VerificationReport {
            passed: false,
            tally: Tally {
                total: 2,
                passed: 1,
                failed: 1,
            },
            suites,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn text_lists_checks_and_tally() {
        let text = render_text(&report());
        assert!(text.contains("SILVER suite: 2 check(s), 1 failed"));
        assert!(text.contains("[PASS] silver_duplicate_keys"));
        assert!(text.contains("[FAIL] silver_value_ranges"));
        assert!(text.contains("Total: 1 passed, 1 failed of 2 -> FAIL"));
    }

    #[test]
    fn text_caps_diagnostic_samples() {
        let text = render_text(&report());
        assert_eq!(text.matches("error: certificate").count(), TEXT_SAMPLES);
        assert!(text.contains("... 3 more error(s)"));
    }

    #[test]
    fn json_keys_suites_by_layer() {
        let json: serde_json::Value =
            serde_json::from_str(&render_json(&report()).unwrap()).unwrap();
        assert_eq!(json["passed"], false);
        assert_eq!(json["tally"]["failed"], 1);
        assert_eq!(json["suites"]["silver"][1]["records_failed"], 8);
    }
}
