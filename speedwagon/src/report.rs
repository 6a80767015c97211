//! Final job summary shown to the user

use std::fmt::Write;

use speedwagon_sdk::JobOutcome;

/// Workflow report, then the failed tasks, then the abort reason if there was one
pub fn render_summary(outcome: &JobOutcome) -> String {
    let mut out = String::new();

    if let Some(report) = &outcome.report {
        out.push_str(report.trim_end());
        out.push('\n');
    }

    if !outcome.failures.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "Failed tasks ({}):", outcome.failures.len());
        for failure in &outcome.failures {
            let _ = writeln!(
                out,
                "  {} [{}]: {}",
                failure.subtask, failure.task_id, failure.reason
            );
        }
    }

    if let Some(reason) = &outcome.abort_reason {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "Job aborted: {}", reason);
    }

    let elapsed = outcome.finished_at - outcome.started_at;
    if !out.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "{}: {} succeeded, {} failed in {:.1}s",
        outcome.state,
        outcome.results.len(),
        outcome.failures.len(),
        elapsed.num_milliseconds() as f64 / 1000.0
    );

    out
}
