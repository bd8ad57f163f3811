use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use crate::cli::OutputFormat;
use crate::pipeline::{Deliverable, RunOutcome};
use crate::report::{AttemptStatus, RunReport, RunStatus};
use crate::utils::{format_duration, format_file_size};

pub mod progress;

pub use progress::RunProgress;

#[derive(Serialize)]
struct JsonOutcome<'a> {
    report: &'a RunReport,
    deliverable: Option<&'a Deliverable>,
}

/// Render a finished run in the requested format
pub fn render(outcome: &RunOutcome, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(outcome)),
        OutputFormat::Json => render_json(outcome),
    }
}

pub fn render_json(outcome: &RunOutcome) -> Result<String> {
    serde_json::to_string_pretty(&JsonOutcome {
        report: &outcome.report,
        deliverable: outcome.deliverable.as_ref(),
    })
    .context("Failed to serialize run report")
}

pub fn render_text(outcome: &RunOutcome) -> String {
    let report = &outcome.report;
    let mut out = String::new();

    let _ = writeln!(out, "{}", style(report.source()).bold().underlined());
    let _ = writeln!(
        out,
        "  {}: {} in {}",
        style("Status").dim(),
        status_label(report.status()),
        format_duration(report.elapsed().num_milliseconds().max(0) as f64 / 1000.0)
    );

    for record in report.records() {
        let marker = match record.status {
            AttemptStatus::Succeeded => style("✓").green(),
            AttemptStatus::Retryable => style("↻").yellow(),
            AttemptStatus::Fatal => style("✗").red(),
            AttemptStatus::Cancelled => style("-").dim(),
        };
        let _ = writeln!(
            out,
            "  {} {} #{} [{}] {} {}",
            marker,
            record.stage,
            record.attempt,
            record.options,
            record.diagnostic,
            style(format!("({}ms)", record.elapsed_ms)).dim()
        );
    }

    if let Some(failure) = report.failure() {
        let _ = writeln!(
            out,
            "  {}: {} after {} attempt(s): {}",
            style("Stopped at").dim(),
            failure.stage,
            failure.attempts,
            failure.diagnostic
        );
    }

    if let Some(deliverable) = &outcome.deliverable {
        if let Some(path) = &deliverable.exported_to {
            let _ = writeln!(
                out,
                "  {}: {} ({})",
                style("Saved to").dim(),
                path.display(),
                format_file_size(deliverable.size)
            );
        } else if let Some(text) = &deliverable.text {
            let _ = writeln!(out, "\n{}", text);
        }
    }

    out
}

fn status_label(status: RunStatus) -> String {
    let label = status.to_string();
    match status {
        RunStatus::Completed => style(label).green().bold().to_string(),
        RunStatus::PartiallyCompleted => style(label).cyan().bold().to_string(),
        RunStatus::Failed => style(label).red().bold().to_string(),
        RunStatus::Cancelled => style(label).yellow().bold().to_string(),
    }
}

/// Print a finished run to the console
pub fn print_to_console(outcome: &RunOutcome, format: OutputFormat) -> Result<()> {
    println!("{}", render(outcome, format)?);
    Ok(())
}

/// Report the failing stage of an unsuccessful run on stderr
pub fn print_failure(outcome: &RunOutcome) {
    let report = &outcome.report;
    match report.failure() {
        Some(failure) => eprintln!(
            "{} {} {} at stage {}: {}",
            style(">>").red().bold(),
            report.source(),
            report.status(),
            style(failure.stage).bold(),
            failure.diagnostic
        ),
        None => eprintln!(
            "{} {} {}",
            style(">>").red().bold(),
            report.source(),
            report.status()
        ),
    }
}

/// Save the run report as JSON
pub fn save_report(report: &RunReport, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, content)?;
    Ok(())
}

/// Save the reports of several runs as one JSON array
pub fn save_reports(reports: &[&RunReport], path: &Path) -> Result<()> {
    let content =
        serde_json::to_string_pretty(reports).context("Failed to serialize run reports")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactKind;
    use crate::job::{Credentials, Job};
    use crate::pipeline::Escalation;
    use crate::report::{ReportBuilder, StageRecord};
    use crate::stages::{QualityHint, StageKind, StageOptions};

    fn failed_outcome() -> RunOutcome {
        let job = Job::new("https://youtu.be/abc", Credentials::new("sk-hidden"));
        let mut builder = ReportBuilder::new(&job);
        builder.push(StageRecord {
            stage: StageKind::Fetch,
            attempt: 1,
            status: AttemptStatus::Fatal,
            options: StageOptions::quality(QualityHint::Best),
            diagnostic: "Video unavailable".to_string(),
            elapsed_ms: 12,
            artifact_size: None,
        });
        builder.set_failure(
            StageKind::Fetch,
            "Video unavailable",
            Some(Escalation::NotRetryable),
        );
        RunOutcome {
            report: builder.finish(RunStatus::Failed),
            deliverable: None,
        }
    }

    #[test]
    fn test_text_render_names_failing_stage() {
        console::set_colors_enabled(false);
        let text = render_text(&failed_outcome());
        assert!(text.contains("https://youtu.be/abc"));
        assert!(text.contains("failed"));
        assert!(text.contains("fetch #1 [quality=best] Video unavailable"));
        assert!(text.contains("Stopped at: fetch after 1 attempt(s)"));
    }

    #[test]
    fn test_text_render_includes_document() {
        console::set_colors_enabled(false);
        let job = Job::new("clip.mp4", Credentials::new("k"));
        let outcome = RunOutcome {
            report: ReportBuilder::new(&job).finish(RunStatus::Completed),
            deliverable: Some(Deliverable {
                kind: ArtifactKind::GeneratedDocument,
                size: 11,
                sha256: None,
                format: Some("markdown".to_string()),
                text: Some("# A summary".to_string()),
                exported_to: None,
            }),
        };
        assert!(render_text(&outcome).ends_with("# A summary\n"));
    }

    #[test]
    fn test_json_render_never_contains_credentials() {
        let json = render_json(&failed_outcome()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["report"]["status"], "failed");
        assert_eq!(value["report"]["failure"]["stage"], "fetch");
        assert!(value["deliverable"].is_null());
        assert!(!json.contains("sk-hidden"));
    }

    #[test]
    fn test_save_report_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        save_report(&failed_outcome().report, &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"fetch\""));
    }
}
