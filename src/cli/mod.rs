use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::stages::{DocumentStyle, StageKind};

#[derive(Parser)]
#[command(
    name = "video-digest",
    about = "Video Digest - Turn online videos into transcripts, summaries and blog posts",
    version,
    long_about = "Downloads a video, extracts its audio track, transcribes it with a Whisper-compatible API and generates a summary or blog post from the transcript. Every stage is retried with fallbacks and each run ends with a full report."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for one or more videos
    Run {
        /// Video URLs or local files
        #[arg(value_name = "SOURCE", required = true)]
        sources: Vec<String>,

        /// API key for the speech-to-text and generation service
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Kind of document to generate
        #[arg(short, long, value_enum, default_value = "summary")]
        style: DocumentStyle,

        /// Stop after this stage
        #[arg(long, value_enum, default_value = "generate")]
        until: StageKind,

        /// Copy the final artifact to this path (per-source suffix with several sources)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Save the run report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Language code for transcription (auto-detect if not specified)
        #[arg(short, long, value_name = "LANG")]
        language: Option<String>,
    },

    /// Show the effective configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Check that external tools are installed
    Check,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text
    #[default]
    Text,
    /// JSON with the full run report
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per event
    Json,
}
