use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod policy;

pub use policy::{Backoff, Escalation, RetryDecision, RetryPolicy, RetryState, StagePolicy};

use crate::artifacts::{Artifact, ArtifactHandle, ArtifactKind, ArtifactStore, JobWorkspace};
use crate::config::Config;
use crate::job::Job;
use crate::remote::{ChatGenerator, WhisperTranscriber};
use crate::report::{AttemptStatus, ReportBuilder, RunReport, RunStatus, StageRecord};
use crate::sources::SourceRegistry;
use crate::stages::{
    DocumentStyle, ExtractAudioStage, FetchStage, GenerateStage, Stage, StageContext, StageError,
    StageInput, StageKind, StageOptions, StageOutput, StageResult, TranscribeStage,
};
use crate::transcode::FfmpegTranscoder;

/// The four stage implementations, one per pipeline slot.
pub struct StageSet {
    pub fetch: Arc<dyn Stage>,
    pub extract_audio: Arc<dyn Stage>,
    pub transcribe: Arc<dyn Stage>,
    pub generate: Arc<dyn Stage>,
}

impl StageSet {
    fn get(&self, kind: StageKind) -> &dyn Stage {
        match kind {
            StageKind::Fetch => self.fetch.as_ref(),
            StageKind::ExtractAudio => self.extract_audio.as_ref(),
            StageKind::Transcribe => self.transcribe.as_ref(),
            StageKind::Generate => self.generate.as_ref(),
        }
    }
}

/// Retry policy and per-attempt timeout of one stage.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub policy: StagePolicy,
    pub timeout: Duration,
}

impl Default for StagePlan {
    fn default() -> Self {
        Self {
            policy: StagePolicy::new(RetryPolicy::default(), Vec::new()),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub fetch: StagePlan,
    pub extract_audio: StagePlan,
    pub transcribe: StagePlan,
    pub generate: StagePlan,
}

impl PipelineSettings {
    pub fn plan(&self, kind: StageKind) -> &StagePlan {
        match kind {
            StageKind::Fetch => &self.fetch,
            StageKind::ExtractAudio => &self.extract_audio,
            StageKind::Transcribe => &self.transcribe,
            StageKind::Generate => &self.generate,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let plan = |stage: &crate::config::StageConfig, chain: Vec<StageOptions>| StagePlan {
            policy: StagePolicy::new(stage.retry.clone(), chain),
            timeout: Duration::from_secs(stage.timeout_secs),
        };

        Self {
            fetch: plan(
                &config.fetch.stage,
                config
                    .fetch
                    .fallback_chain
                    .iter()
                    .copied()
                    .map(StageOptions::quality)
                    .collect(),
            ),
            extract_audio: plan(
                &config.extract.stage,
                config
                    .extract
                    .fallback_chain
                    .iter()
                    .copied()
                    .map(StageOptions::codec)
                    .collect(),
            ),
            transcribe: plan(&config.transcribe, Vec::new()),
            generate: plan(&config.generate, Vec::new()),
        }
    }
}

/// Per-run choices made by the caller.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub style: DocumentStyle,
    pub language: Option<String>,
    /// Last stage to run; anything earlier than `Generate` yields a partial run.
    pub until: StageKind,
    /// Copy the final artifact here before it is released.
    pub export_to: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            style: DocumentStyle::default(),
            language: None,
            until: StageKind::Generate,
            export_to: None,
        }
    }
}

/// Hooks for progress display. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn attempt_started(
        &self,
        _job: Uuid,
        _stage: StageKind,
        _attempt: u32,
        _options: &StageOptions,
    ) {
    }

    fn attempt_finished(&self, _job: Uuid, _record: &StageRecord) {}
}

pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// What a successful run hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Deliverable {
    pub kind: ArtifactKind,
    pub size: u64,
    pub sha256: Option<String>,
    pub format: Option<String>,
    /// Content of textual artifacts (transcript or document).
    pub text: Option<String>,
    pub exported_to: Option<PathBuf>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub deliverable: Option<Deliverable>,
}

/// Why the stage loop stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Failed,
    Cancelled,
}

/// Fail-fast executor for Fetch → ExtractAudio → Transcribe → Generate.
pub struct Pipeline {
    stages: StageSet,
    settings: PipelineSettings,
    store: Arc<ArtifactStore>,
    observer: Arc<dyn RunObserver>,
}

impl Pipeline {
    pub fn new(stages: StageSet, settings: PipelineSettings, store: Arc<ArtifactStore>) -> Self {
        Self {
            stages,
            settings,
            store,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Build the pipeline with the default collaborators.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = ArtifactStore::new(config.app.temp_dir.as_deref(), config.app.hash_artifacts)
            .context("Failed to create artifact store")?;

        let sources = SourceRegistry::for_backend(config.fetch.backend, &config.fetch.yt_dlp_path);
        tracing::debug!("Fetch backends: {:?}", sources.list_platforms());

        let stages = StageSet {
            fetch: Arc::new(FetchStage::new(Arc::new(sources))),
            extract_audio: Arc::new(ExtractAudioStage::new(Arc::new(FfmpegTranscoder::new(
                config.extract.ffmpeg_path.clone(),
            )))),
            transcribe: Arc::new(TranscribeStage::new(Arc::new(WhisperTranscriber::new(
                &config.api.base_url,
                &config.api.transcription_model,
            )))),
            generate: Arc::new(GenerateStage::new(Arc::new(ChatGenerator::new(
                &config.api.base_url,
                &config.api.generation_model,
                config.api.max_tokens,
            )))),
        };

        Ok(Self::new(
            stages,
            PipelineSettings::from_config(config),
            Arc::new(store),
        ))
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run every stage for `job`, returning exactly one report.
    #[tracing::instrument(skip_all, fields(job_id = %job.id()))]
    pub async fn run(
        &self,
        job: &Job,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        tracing::info!("Starting pipeline for {}", job.source());
        let mut report = ReportBuilder::new(job);

        let mut workspace = match self.store.open_workspace(job.id()) {
            Ok(ws) => ws,
            Err(e) => {
                report.set_failure(
                    StageKind::Fetch,
                    format!("Could not create job workspace: {}", e),
                    None,
                );
                return RunOutcome {
                    report: report.finish(RunStatus::Failed),
                    deliverable: None,
                };
            }
        };

        let mut held: Vec<ArtifactHandle> = Vec::new();
        let driven = self
            .drive(job, options, cancel, &mut workspace, &mut held, &mut report)
            .await;

        let (status, deliverable) = match driven {
            Ok(artifact) => match deliver(&artifact, options).await {
                Ok(deliverable) => {
                    let status = if options.until == StageKind::Generate {
                        RunStatus::Completed
                    } else {
                        RunStatus::PartiallyCompleted
                    };
                    (status, Some(deliverable))
                }
                Err(e) => {
                    report.set_failure(
                        options.until,
                        format!("Could not deliver final artifact: {}", e),
                        None,
                    );
                    (RunStatus::Failed, None)
                }
            },
            Err(Halt::Failed) => (RunStatus::Failed, None),
            Err(Halt::Cancelled) => (RunStatus::Cancelled, None),
        };

        for handle in held.drain(..) {
            workspace.release(handle);
        }

        let report = report.finish(status);
        match report.failure() {
            Some(failure) => tracing::error!(
                "Pipeline {} at {} after {} attempt(s): {}",
                status,
                failure.stage,
                failure.attempts,
                failure.diagnostic
            ),
            None => tracing::info!("Pipeline {}", status),
        }

        RunOutcome {
            report,
            deliverable,
        }
    }

    /// Sequence the stages, keeping every live handle in `held`.
    async fn drive(
        &self,
        job: &Job,
        options: &RunOptions,
        cancel: &CancellationToken,
        workspace: &mut JobWorkspace,
        held: &mut Vec<ArtifactHandle>,
        report: &mut ReportBuilder,
    ) -> Result<Artifact, Halt> {
        let mut previous: Option<Artifact> = None;

        for kind in StageKind::ALL.into_iter().filter(|kind| *kind <= options.until) {
            if cancel.is_cancelled() {
                report.set_failure(kind, StageError::Cancelled.to_string(), None);
                return Err(Halt::Cancelled);
            }

            if let Some(artifact) = &previous {
                if Some(artifact.kind) != kind.input_kind() {
                    let err = StageError::ContractViolation(format!(
                        "{} received a {} artifact",
                        kind, artifact.kind
                    ));
                    self.record(
                        job,
                        report,
                        kind,
                        1,
                        AttemptStatus::Fatal,
                        &StageOptions::default(),
                        err.to_string(),
                        0,
                        None,
                    );
                    report.set_failure(kind, err.to_string(), Some(Escalation::NotRetryable));
                    return Err(Halt::Failed);
                }
            }

            let stage = self.stages.get(kind);
            let handle = workspace.allocate(stage.kind().output_kind());
            let input = match &previous {
                Some(artifact) => StageInput::Artifact(artifact),
                None => StageInput::Job(job),
            };

            match self
                .run_stage(kind, stage, input, job, options, cancel, workspace, &handle, report)
                .await
            {
                Ok(artifact) => {
                    // The input has been consumed
                    if let Some(consumed) = held.pop() {
                        workspace.release(consumed);
                    }
                    held.push(handle);
                    previous = Some(artifact);
                }
                Err(halt) => {
                    held.push(handle);
                    return Err(halt);
                }
            }
        }

        previous.ok_or(Halt::Failed)
    }

    /// Attempt loop of one stage under its retry/fallback policy.
    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        kind: StageKind,
        stage: &dyn Stage,
        input: StageInput<'_>,
        job: &Job,
        options: &RunOptions,
        cancel: &CancellationToken,
        workspace: &JobWorkspace,
        handle: &ArtifactHandle,
        report: &mut ReportBuilder,
    ) -> Result<Artifact, Halt> {
        let plan = self.settings.plan(kind);
        let mut state = RetryState::default();
        let mut current = plan.policy.initial_options().clone();

        loop {
            state.attempts += 1;
            let attempt = state.attempts;

            if attempt > 1 {
                if let Err(e) = workspace.reset(handle) {
                    let err = StageError::from(e);
                    self.record(
                        job,
                        report,
                        kind,
                        attempt,
                        AttemptStatus::Fatal,
                        &current,
                        err.to_string(),
                        0,
                        None,
                    );
                    report.set_failure(kind, err.to_string(), Some(Escalation::NotRetryable));
                    return Err(Halt::Failed);
                }
            }

            tracing::info!("{} attempt {} ({})", kind, attempt, current);
            self.observer.attempt_started(job.id(), kind, attempt, &current);

            let ctx = StageContext {
                credentials: job.credentials(),
                options: &current,
                style: options.style,
                language: options.language.as_deref(),
            };

            let started = Instant::now();
            let attempt_run = async {
                let result = tokio::time::timeout(
                    plan.timeout,
                    stage.execute(input, &ctx, handle.path()),
                )
                .await
                .unwrap_or(Err(StageError::Timeout(plan.timeout)));
                settle(workspace, handle, result).await
            };
            let executed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = attempt_run => Some(outcome),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let Some(outcome) = executed else {
                self.record(
                    job,
                    report,
                    kind,
                    attempt,
                    AttemptStatus::Cancelled,
                    &current,
                    StageError::Cancelled.to_string(),
                    elapsed_ms,
                    None,
                );
                report.set_failure(kind, StageError::Cancelled.to_string(), None);
                return Err(Halt::Cancelled);
            };

            match outcome {
                StageResult::Success(artifact) => {
                    self.record(
                        job,
                        report,
                        kind,
                        attempt,
                        AttemptStatus::Succeeded,
                        &current,
                        format!("produced {}", crate::utils::format_file_size(artifact.size)),
                        elapsed_ms,
                        Some(artifact.size),
                    );
                    return Ok(artifact);
                }
                StageResult::FatalFailure(err) => {
                    tracing::error!("{} attempt {} failed fatally: {}", kind, attempt, err);
                    self.record(
                        job,
                        report,
                        kind,
                        attempt,
                        AttemptStatus::Fatal,
                        &current,
                        err.to_string(),
                        elapsed_ms,
                        None,
                    );
                    report.set_failure(kind, err.to_string(), Some(Escalation::NotRetryable));
                    return Err(Halt::Failed);
                }
                StageResult::RetryableFailure(err) => match plan.policy.decide(&state, &err) {
                    RetryDecision::Retry { delay } => {
                        tracing::warn!("{} attempt {} failed, retrying: {}", kind, attempt, err);
                        self.record(
                            job,
                            report,
                            kind,
                            attempt,
                            AttemptStatus::Retryable,
                            &current,
                            err.to_string(),
                            elapsed_ms,
                            None,
                        );
                        if !pause(delay, cancel).await {
                            report.set_failure(kind, StageError::Cancelled.to_string(), None);
                            return Err(Halt::Cancelled);
                        }
                    }
                    RetryDecision::Fallback { options: next, delay } => {
                        tracing::warn!(
                            "{} attempt {} failed, falling back to {}: {}",
                            kind,
                            attempt,
                            next,
                            err
                        );
                        self.record(
                            job,
                            report,
                            kind,
                            attempt,
                            AttemptStatus::Retryable,
                            &current,
                            format!("{}; falling back to {}", err, next),
                            elapsed_ms,
                            None,
                        );
                        state.chain_position += 1;
                        current = next;
                        if !pause(delay, cancel).await {
                            report.set_failure(kind, StageError::Cancelled.to_string(), None);
                            return Err(Halt::Cancelled);
                        }
                    }
                    RetryDecision::Escalate(reason) => {
                        let diagnostic = format!("{} ({})", err, reason);
                        tracing::error!("{} attempt {} failed: {}", kind, attempt, diagnostic);
                        self.record(
                            job,
                            report,
                            kind,
                            attempt,
                            AttemptStatus::Fatal,
                            &current,
                            diagnostic.clone(),
                            elapsed_ms,
                            None,
                        );
                        report.set_failure(kind, diagnostic, Some(reason));
                        return Err(Halt::Failed);
                    }
                },
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        job: &Job,
        report: &mut ReportBuilder,
        stage: StageKind,
        attempt: u32,
        status: AttemptStatus,
        options: &StageOptions,
        diagnostic: String,
        elapsed_ms: u64,
        artifact_size: Option<u64>,
    ) {
        let record = StageRecord {
            stage,
            attempt,
            status,
            options: options.clone(),
            diagnostic,
            elapsed_ms,
            artifact_size,
        };
        self.observer.attempt_finished(job.id(), &record);
        report.push(record);
    }
}

/// Classify an attempt: stage errors by their kind, written output by the store.
async fn settle(
    workspace: &JobWorkspace,
    handle: &ArtifactHandle,
    result: Result<StageOutput, StageError>,
) -> StageResult {
    let finalized = match result {
        Ok(output) => workspace
            .finalize(handle, output.format)
            .await
            .map_err(StageError::from),
        Err(err) => Err(err),
    };

    match finalized {
        Ok(artifact) => StageResult::Success(artifact),
        Err(err) => StageResult::from_error(err),
    }
}

/// Sleep between attempts; `false` if cancelled meanwhile.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Copy out what the caller keeps before the final slot is released.
async fn deliver(artifact: &Artifact, options: &RunOptions) -> Result<Deliverable, StageError> {
    let text = if artifact.kind.is_text() {
        Some(tokio::fs::read_to_string(&artifact.path).await?)
    } else {
        None
    };

    let exported_to = match &options.export_to {
        Some(dest) => {
            if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&artifact.path, dest).await?;
            Some(dest.clone())
        }
        None => None,
    };

    Ok(Deliverable {
        kind: artifact.kind,
        size: artifact.size,
        sha256: artifact.sha256.clone(),
        format: artifact.format.clone(),
        text,
        exported_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::job::Credentials;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Writes fixed bytes; fails the first `failures` attempts with an empty file.
    struct FlakyStage {
        kind: StageKind,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStage {
        fn new(kind: StageKind, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                kind,
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Stage for FlakyStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        async fn execute(
            &self,
            _input: StageInput<'_>,
            _ctx: &StageContext<'_>,
            output: &Path,
        ) -> Result<StageOutput, StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let bytes: &[u8] = if call <= self.failures { b"" } else { b"payload" };
            tokio::fs::write(output, bytes).await?;
            Ok(StageOutput::default())
        }
    }

    fn fast_settings() -> PipelineSettings {
        let plan = StagePlan {
            policy: StagePolicy::new(
                RetryPolicy {
                    max_attempts: 3,
                    backoff: Backoff::None,
                },
                Vec::new(),
            ),
            timeout: Duration::from_secs(5),
        };
        PipelineSettings {
            fetch: plan.clone(),
            extract_audio: plan.clone(),
            transcribe: plan.clone(),
            generate: plan,
        }
    }

    fn pipeline(root: &Path, extract_failures: u32) -> Pipeline {
        let stages = StageSet {
            fetch: FlakyStage::new(StageKind::Fetch, 0),
            extract_audio: FlakyStage::new(StageKind::ExtractAudio, extract_failures),
            transcribe: FlakyStage::new(StageKind::Transcribe, 0),
            generate: FlakyStage::new(StageKind::Generate, 0),
        };
        let store = ArtifactStore::new(Some(root), false).unwrap();
        Pipeline::new(stages, fast_settings(), Arc::new(store))
    }

    #[tokio::test]
    async fn test_empty_output_is_retried_then_succeeds() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(root.path(), 1);
        let job = Job::new("clip.mp4", Credentials::new("k"));

        let outcome = pipeline
            .run(&job, &RunOptions::default(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.report.status(), RunStatus::Completed);
        assert_eq!(outcome.report.attempts_for(StageKind::ExtractAudio), 2);
        assert_eq!(outcome.report.records()[1].status, AttemptStatus::Retryable);
        assert_eq!(
            outcome.deliverable.unwrap().text.as_deref(),
            Some("payload")
        );
        let stats = pipeline.store().stats();
        assert_eq!(stats.released, stats.allocated);
        assert_eq!(stats.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_always_empty_output_escalates_after_budget() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(root.path(), u32::MAX);
        let job = Job::new("clip.mp4", Credentials::new("k"));

        let outcome = pipeline
            .run(&job, &RunOptions::default(), &CancellationToken::new())
            .await;

        let report = &outcome.report;
        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.attempts_for(StageKind::ExtractAudio), 3);
        assert!(!report.ran(StageKind::Transcribe));
        let failure = report.failure().unwrap();
        assert_eq!(failure.stage, StageKind::ExtractAudio);
        assert_eq!(failure.escalation, Some(Escalation::AttemptsExhausted));
        assert!(report
            .records()
            .iter()
            .all(|r| r.status != AttemptStatus::Succeeded || r.artifact_size.unwrap_or(0) > 0));
        assert!(outcome.deliverable.is_none());
        let stats = pipeline.store().stats();
        assert_eq!(stats.released, stats.allocated);
        assert_eq!(stats.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_until_stops_early_with_partial_status() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(root.path(), 0);
        let job = Job::new("clip.mp4", Credentials::new("k"));
        let options = RunOptions {
            until: StageKind::ExtractAudio,
            ..RunOptions::default()
        };

        let outcome = pipeline.run(&job, &options, &CancellationToken::new()).await;

        assert_eq!(outcome.report.status(), RunStatus::PartiallyCompleted);
        assert!(!outcome.report.ran(StageKind::Transcribe));
        let deliverable = outcome.deliverable.unwrap();
        assert_eq!(deliverable.kind, ArtifactKind::RawAudio);
        assert!(deliverable.text.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(root.path(), 0);
        let job = Job::new("clip.mp4", Credentials::new("k"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pipeline.run(&job, &RunOptions::default(), &cancel).await;

        assert_eq!(outcome.report.status(), RunStatus::Cancelled);
        assert!(outcome.report.records().is_empty());
        assert_eq!(pipeline.store().stats().allocated, 0);
    }

    #[test]
    fn test_settings_follow_config_chains() {
        let settings = PipelineSettings::from_config(&Config::default());
        assert_eq!(settings.fetch.policy.chain().len(), 3);
        assert_eq!(
            settings.extract_audio.policy.initial_options(),
            &StageOptions::codec(crate::stages::AudioCodec::Mp3)
        );
        assert_eq!(settings.transcribe.policy.chain(), &[StageOptions::default()]);
    }
}
