//! Audit trail of one pipeline run.
//!
//! Every attempt of every stage is one [`StageRecord`], in the order the
//! attempts happened. Only the executor can build a report; callers receive
//! the finished, read-only [`RunReport`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::job::Job;
use crate::pipeline::policy::Escalation;
use crate::stages::{StageKind, StageOptions};

/// Outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Retryable,
    Fatal,
    Cancelled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Retryable => "retryable",
            AttemptStatus::Fatal => "fatal",
            AttemptStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: StageKind,
    /// 1-based attempt number within the stage.
    pub attempt: u32,
    pub status: AttemptStatus,
    pub options: StageOptions,
    pub diagnostic: String,
    pub elapsed_ms: u64,
    /// Size of the produced artifact on success.
    pub artifact_size: Option<u64>,
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded.
    Completed,
    /// Every requested stage succeeded; the caller stopped the run early.
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::PartiallyCompleted)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::PartiallyCompleted => "partially completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureSummary {
    pub stage: StageKind,
    pub attempts: u32,
    pub diagnostic: String,
    pub escalation: Option<Escalation>,
}

impl FailureSummary {
    pub fn fallback_exhausted(&self) -> bool {
        self.escalation == Some(Escalation::FallbackExhausted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    job_id: Uuid,
    source: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    status: RunStatus,
    records: Vec<StageRecord>,
    failure: Option<FailureSummary>,
}

impl RunReport {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn failure(&self) -> Option<&FailureSummary> {
        self.failure.as_ref()
    }

    /// Number of attempts made by `stage` (0 if it never ran).
    pub fn attempts_for(&self, stage: StageKind) -> u32 {
        self.records
            .iter()
            .filter(|record| record.stage == stage)
            .count() as u32
    }

    /// Whether `stage` was invoked at all.
    pub fn ran(&self, stage: StageKind) -> bool {
        self.attempts_for(stage) > 0
    }

    /// The (stage, status) sequence, for comparing runs.
    pub fn outcome_sequence(&self) -> Vec<(StageKind, AttemptStatus)> {
        self.records
            .iter()
            .map(|record| (record.stage, record.status))
            .collect()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Mutable side of a report, owned by the executor during a run.
pub(crate) struct ReportBuilder {
    job_id: Uuid,
    source: String,
    started_at: DateTime<Utc>,
    records: Vec<StageRecord>,
    failure: Option<FailureSummary>,
}

impl ReportBuilder {
    pub(crate) fn new(job: &Job) -> Self {
        Self {
            job_id: job.id(),
            source: job.source().to_string(),
            started_at: Utc::now(),
            records: Vec::new(),
            failure: None,
        }
    }

    pub(crate) fn push(&mut self, record: StageRecord) {
        self.records.push(record);
    }

    pub(crate) fn set_failure(
        &mut self,
        stage: StageKind,
        diagnostic: impl Into<String>,
        escalation: Option<Escalation>,
    ) {
        let attempts = self
            .records
            .iter()
            .filter(|record| record.stage == stage)
            .count() as u32;
        self.failure = Some(FailureSummary {
            stage,
            attempts,
            diagnostic: diagnostic.into(),
            escalation,
        });
    }

    pub(crate) fn finish(self, status: RunStatus) -> RunReport {
        RunReport {
            job_id: self.job_id,
            source: self.source,
            started_at: self.started_at,
            finished_at: Utc::now(),
            status,
            records: self.records,
            failure: self.failure,
        }
    }
}
