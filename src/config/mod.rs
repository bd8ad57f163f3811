use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;
use crate::pipeline::RetryPolicy;
use crate::sources::FetchBackend;
use crate::stages::{AudioCodec, QualityHint};

const LOCAL_CONFIG: &str = "video-digest.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Speech-to-text and generation service
    pub api: ApiConfig,

    pub fetch: FetchConfig,

    pub extract: ExtractConfig,

    pub transcribe: StageConfig,

    pub generate: StageConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    pub transcription_model: String,

    pub generation_model: String,

    /// Upper bound on generated tokens
    pub max_tokens: u32,

    /// Default transcription language (auto-detect if not specified)
    pub language: Option<String>,
}

/// Settings shared by every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub retry: RetryPolicy,

    /// Per-attempt timeout
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    #[serde(flatten)]
    pub stage: StageConfig,

    pub backend: FetchBackend,

    pub yt_dlp_path: String,

    /// Quality hints tried in order when no usable stream exists
    pub fallback_chain: Vec<QualityHint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    #[serde(flatten)]
    pub stage: StageConfig,

    pub ffmpeg_path: String,

    /// Audio codecs tried in order when the preferred one cannot be produced
    pub fallback_chain: Vec<AudioCodec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root for job workspaces (system temp dir if not specified)
    pub temp_dir: Option<PathBuf>,

    /// Record a SHA-256 digest for every artifact
    pub hash_artifacts: bool,

    /// Default output format
    pub default_output_format: OutputFormat,

    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            transcription_model: "whisper-1".to_string(),
            generation_model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            language: None,
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout_secs: 600,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            stage: StageConfig::default(),
            backend: FetchBackend::Auto,
            yt_dlp_path: "yt-dlp".to_string(),
            fallback_chain: vec![QualityHint::Best, QualityHint::Worst, QualityHint::Alternate],
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            stage: StageConfig {
                timeout_secs: 300,
                ..StageConfig::default()
            },
            ffmpeg_path: "ffmpeg".to_string(),
            fallback_chain: vec![AudioCodec::Mp3, AudioCodec::M4a, AudioCodec::Wav],
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            hash_artifacts: true,
            default_output_format: OutputFormat::Text,
            max_concurrent_jobs: 3,
        }
    }
}

impl Config {
    /// Load configuration from `explicit`, the local file or the user config dir.
    ///
    /// Falls back to defaults when no file exists; nothing is written.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match Self::config_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;
        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Get configuration file path
    pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::config_dir()
            .map(|dir| dir.join("video-digest").join("config.yaml"))
            .filter(|path| path.exists())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let stages = [
            ("fetch", &self.fetch.stage),
            ("extract", &self.extract.stage),
            ("transcribe", &self.transcribe),
            ("generate", &self.generate),
        ];
        for (name, stage) in stages {
            if stage.retry.max_attempts == 0 {
                anyhow::bail!("{}.retry.max_attempts must be at least 1", name);
            }
            if stage.timeout_secs == 0 {
                anyhow::bail!("{}.timeout_secs must be at least 1", name);
            }
        }

        if self.fetch.fallback_chain.is_empty() {
            anyhow::bail!("fetch.fallback_chain must not be empty");
        }
        if self.extract.fallback_chain.is_empty() {
            anyhow::bail!("extract.fallback_chain must not be empty");
        }
        if self.app.max_concurrent_jobs == 0 {
            anyhow::bail!("app.max_concurrent_jobs must be at least 1");
        }
        url::Url::parse(&self.api.base_url).context("api.base_url is not a valid URL")?;

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        let chain = |items: Vec<&str>| items.join(" → ");

        println!("Current Configuration:");
        println!("  API Base URL: {}", self.api.base_url);
        println!("  Transcription Model: {}", self.api.transcription_model);
        println!("  Generation Model: {}", self.api.generation_model);
        if let Some(language) = &self.api.language {
            println!("  Language: {}", language);
        }
        println!("  Fetch Backend: {:?}", self.fetch.backend);
        println!(
            "  Fetch Fallback: {}",
            chain(self.fetch.fallback_chain.iter().map(|q| q.as_str()).collect())
        );
        println!(
            "  Extract Fallback: {}",
            chain(self.extract.fallback_chain.iter().map(|c| c.as_str()).collect())
        );
        for (name, stage) in [
            ("Fetch", &self.fetch.stage),
            ("Extract", &self.extract.stage),
            ("Transcribe", &self.transcribe),
            ("Generate", &self.generate),
        ] {
            println!(
                "  {} Retry: {} attempt(s), {}s timeout",
                name, stage.retry.max_attempts, stage.timeout_secs
            );
        }
        if let Some(dir) = &self.app.temp_dir {
            println!("  Temp Dir: {}", dir.display());
        }
        println!("  Hash Artifacts: {}", self.app.hash_artifacts);
        println!("  Default Format: {}", self.app.default_output_format);
        println!("  Max Concurrent Jobs: {}", self.app.max_concurrent_jobs);
    }
}
