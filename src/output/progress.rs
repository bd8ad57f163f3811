//! Spinners for running jobs, one line per job.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::job::Job;
use crate::pipeline::RunObserver;
use crate::report::{AttemptStatus, RunStatus, StageRecord};
use crate::stages::{StageKind, StageOptions};
use crate::utils::source_label;

pub struct RunProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<Uuid, (String, ProgressBar)>>,
}

impl RunProgress {
    pub fn new(quiet: bool) -> Self {
        let target = if quiet {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };

        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Add a spinner for a job about to start.
    pub fn start_job(&self, job: &Job) {
        let label = source_label(job.source());
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_prefix(label.clone());
        pb.set_message("queued");
        pb.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(job.id(), (label, pb));
        }
    }

    /// Replace the job's spinner with its final status.
    pub fn finish_job(&self, job: Uuid, status: RunStatus) {
        let Some((_, pb)) = self.bars.lock().ok().and_then(|mut bars| bars.remove(&job)) else {
            return;
        };

        let message = match status {
            RunStatus::Completed | RunStatus::PartiallyCompleted => {
                style(status.to_string()).green().to_string()
            }
            RunStatus::Failed => style(status.to_string()).red().to_string(),
            RunStatus::Cancelled => style(status.to_string()).yellow().to_string(),
        };
        pb.finish_with_message(message);
    }

    fn with_bar(&self, job: Uuid, f: impl FnOnce(&str, &ProgressBar)) {
        if let Ok(bars) = self.bars.lock() {
            if let Some((label, pb)) = bars.get(&job) {
                f(label, pb);
            }
        }
    }
}

impl RunObserver for RunProgress {
    fn attempt_started(&self, job: Uuid, stage: StageKind, attempt: u32, options: &StageOptions) {
        self.with_bar(job, |_, pb| {
            if attempt == 1 {
                pb.set_message(format!("{}...", stage));
            } else {
                pb.set_message(format!("{} (attempt {}, {})...", stage, attempt, options));
            }
        });
    }

    fn attempt_finished(&self, job: Uuid, record: &StageRecord) {
        if record.status != AttemptStatus::Retryable {
            return;
        }

        self.with_bar(job, |label, pb| {
            pb.println(format!(
                "{} {} {} attempt {} failed: {}",
                style(">>").yellow().bold(),
                label,
                record.stage,
                record.attempt,
                record.diagnostic
            ));
        });
    }
}
