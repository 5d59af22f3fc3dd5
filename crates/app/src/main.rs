mod adapters;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use voxpipe_enrich::EnrichmentWorker;
use voxpipe_foundation::AppConfig;
use voxpipe_storage::{JobStatus, SqliteStorage, Storage, TranscriptionFilter};
use voxpipe_stt::{JobRunner, NullEngine, SpeechEngine};

use adapters::{CommandLanguageModel, CommandSpeechEngine};

#[derive(Parser)]
#[command(name = "voxpipe", about = "Audio transcription and enrichment pipeline")]
struct Cli {
    /// Path to a TOML config file; defaults to ./voxpipe.toml if present.
    #[arg(long, short, env = "VOXPIPE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit and process one audio file.
    Transcribe {
        file: PathBuf,
        /// Disable voice activity detection for this job.
        #[arg(long)]
        no_vad: bool,
    },
    /// Run the enrichment poll worker until interrupted.
    Worker,
    /// Show one transcription as JSON.
    Status { id: String },
    /// Show one transcription's enrichment as JSON.
    Enrichment { id: String },
    /// List transcriptions, optionally filtered.
    List {
        #[arg(long)]
        status: Option<JobStatus>,
        /// Substring match on the transcript text.
        #[arg(long)]
        contains: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Flip whether a transcription is eligible for enrichment.
    SetEnrichment {
        id: String,
        #[arg(value_parser = clap::builder::BoolishValueParser::new())]
        requested: bool,
    },
}

fn init_logging() -> anyhow::Result<()> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "voxpipe.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load(path.map(|p| p.as_path()))
        .map_err(|e| anyhow!("failed to load configuration: {e}"))?;
    if let Err(problems) = config.validate() {
        for p in &problems {
            tracing::error!(target: "config", "{p}");
        }
        return Err(anyhow!("invalid configuration ({} problems)", problems.len()));
    }
    Ok(config)
}

fn open_storage(config: &AppConfig) -> anyhow::Result<Arc<SqliteStorage>> {
    let storage = SqliteStorage::new(&config.storage.db_path)
        .with_context(|| format!("opening database {}", config.storage.db_path))?;
    Ok(Arc::new(storage))
}

fn speech_engine(config: &AppConfig) -> Arc<dyn SpeechEngine> {
    match &config.engine.command {
        Some(command) => Arc::new(CommandSpeechEngine::new(command.clone())),
        None => {
            tracing::warn!(target: "stt", "No engine.command configured, using null engine");
            Arc::new(NullEngine)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let storage = open_storage(&config)?;

    match cli.command {
        Command::Transcribe { file, no_vad } => {
            let runner = JobRunner::new(storage.clone(), speech_engine(&config), config);
            let job = runner.submit(!no_vad)?;
            let done = runner.run_job(&job.id, &file).await?;
            println!("{}", serde_json::to_string_pretty(&done)?);
            if done.status == JobStatus::Error {
                std::process::exit(1);
            }
        }
        Command::Worker => {
            if !config.enrichment.enabled {
                return Err(anyhow!("enrichment is disabled in the configuration"));
            }
            let model = Arc::new(CommandLanguageModel::new(
                config.enrichment.llm_command.clone(),
                config.enrichment.model_path.clone(),
            ));
            let mut worker =
                EnrichmentWorker::new(storage.clone(), model, config.enrichment.clone());
            tokio::select! {
                _ = worker.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                }
            }
            let stats = worker.stats();
            tracing::info!(
                "Worker stopped: {} ok, {} failed, {} skipped",
                stats.succeeded,
                stats.failed,
                stats.skipped
            );
        }
        Command::Status { id } => {
            let job = storage
                .get_transcription(&id)?
                .ok_or_else(|| anyhow!("no transcription with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Enrichment { id } => {
            let enrichment = storage
                .enrichment_for(&id)?
                .ok_or_else(|| anyhow!("no enrichment for transcription {id}"))?;
            println!("{}", serde_json::to_string_pretty(&enrichment)?);
        }
        Command::List {
            status,
            contains,
            limit,
        } => {
            let filter = TranscriptionFilter {
                status,
                text_contains: contains,
                limit: Some(limit),
            };
            for job in storage.list_transcriptions(&filter)? {
                let text = job.text.as_deref().unwrap_or("");
                let preview: String = text.chars().take(60).collect();
                println!(
                    "{}  {:10}  {:>8.1}s  {}",
                    job.id,
                    job.status.to_string(),
                    job.duration.unwrap_or(0.0),
                    preview
                );
            }
        }
        Command::SetEnrichment { id, requested } => {
            storage.set_enrichment_requested(&id, requested)?;
            println!("enrichment_requested = {requested} for {id}");
        }
    }
    Ok(())
}
