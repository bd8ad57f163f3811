use anyhow::{Context, Result};
use clap::Parser;
use futures_util::stream::{self, StreamExt};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use video_digest::cli::{Cli, Commands, LogFormat};
use video_digest::config::Config;
use video_digest::job::{Credentials, Job};
use video_digest::output::{self, RunProgress};
use video_digest::pipeline::{Pipeline, RunObserver, RunOptions, RunOutcome};
use video_digest::stages::StageKind;
use video_digest::utils;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_filter = if verbose {
        "video_digest=debug"
    } else {
        "video_digest=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            sources,
            api_key,
            style,
            until,
            output,
            format,
            report,
            language,
        } => {
            let credentials = match api_key.filter(|key| !key.trim().is_empty()) {
                Some(key) => Credentials::new(key),
                None if until >= StageKind::Transcribe => anyhow::bail!(
                    "An API key is required to {}: pass --api-key or set OPENAI_API_KEY",
                    until
                ),
                None => Credentials::new(""),
            };

            let progress = Arc::new(RunProgress::new(cli.quiet));
            let observer: Arc<dyn RunObserver> = progress.clone();
            let pipeline = Arc::new(Pipeline::from_config(&config)?.with_observer(observer));

            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling running jobs");
                    interrupt.cancel();
                }
            });

            let several = sources.len() > 1;
            let language = language.or_else(|| config.api.language.clone());
            let jobs: Vec<(Job, RunOptions)> = sources
                .into_iter()
                .map(|source| {
                    let export_to = output.as_ref().map(|base| {
                        if several {
                            utils::output_path_for(base, &source)
                        } else {
                            base.clone()
                        }
                    });
                    let options = RunOptions {
                        style,
                        language: language.clone(),
                        until,
                        export_to,
                    };
                    (Job::new(source, credentials.clone()), options)
                })
                .collect();

            tracing::info!(
                "Running {} job(s), up to {} at once",
                jobs.len(),
                config.app.max_concurrent_jobs
            );

            let outcomes: Vec<RunOutcome> = stream::iter(jobs)
                .map(|(job, options)| {
                    let pipeline = Arc::clone(&pipeline);
                    let progress = Arc::clone(&progress);
                    let cancel = cancel.clone();
                    async move {
                        progress.start_job(&job);
                        let outcome = pipeline.run(&job, &options, &cancel).await;
                        progress.finish_job(job.id(), outcome.report.status());
                        outcome
                    }
                })
                .buffered(config.app.max_concurrent_jobs)
                .collect()
                .await;

            let format = format.unwrap_or(config.app.default_output_format);
            for outcome in &outcomes {
                output::print_to_console(outcome, format)?;
                if !outcome.report.status().is_success() {
                    output::print_failure(outcome);
                }
            }

            if let Some(path) = report {
                let reports: Vec<_> = outcomes.iter().map(|o| &o.report).collect();
                match reports.as_slice() {
                    [single] => output::save_report(single, &path),
                    many => output::save_reports(many, &path),
                }
                .with_context(|| format!("Failed to save report to {}", path.display()))?;
                eprintln!("Report saved to: {}", path.display());
            }

            let all_succeeded = outcomes
                .iter()
                .all(|outcome| outcome.report.status().is_success());
            Ok(if all_succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                match Config::config_path(cli.config.as_deref()) {
                    Some(path) => println!("Using config file: {}", path.display()),
                    None => println!("No config file found, using defaults"),
                }
                println!("Run `video-digest config --show` to print the effective settings.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let checks =
                utils::check_dependencies(&config.fetch.yt_dlp_path, &config.extract.ffmpeg_path)
                    .await;
            let mut all_available = true;
            for check in &checks {
                if check.available {
                    println!("  ✓ {} ({})", check.name, check.command);
                } else {
                    all_available = false;
                    println!("  ✗ {} ({}) - {}", check.name, check.command, check.purpose);
                }
            }
            Ok(if all_available {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
