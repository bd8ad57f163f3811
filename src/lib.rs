//! Video Digest - turn online videos into transcripts, summaries and blog posts
//!
//! A job runs through four stages: Fetch downloads the video, ExtractAudio
//! pulls out the audio track, Transcribe sends it to a speech-to-text API and
//! Generate writes the final document. Each stage is retried under its own
//! policy, degrading through a fallback chain when a preferred stream or codec
//! is unavailable, and every run ends with a [`RunReport`].

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod remote;
pub mod report;
pub mod sources;
pub mod stages;
pub mod transcode;
pub mod utils;

pub use artifacts::{Artifact, ArtifactKind, ArtifactStore};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use job::{Credentials, Job};
pub use pipeline::{Pipeline, RunOptions, RunOutcome};
pub use report::{RunReport, RunStatus};
pub use stages::{Stage, StageError, StageKind};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
