//! foundry-chat CLI
//!
//! Usage:
//!   foundry-chat upload docs/a.pdf docs/b.pdf [--concurrency 2]
//!   foundry-chat chat "What does the handbook say about travel?"
//!   foundry-chat env set .env AZURE_SEARCH_INDEX=docs AZURE_AI_MODEL=gpt-4o-mini
//!   foundry-chat env sync .env.example .env
//!
//! Backend URL, timeout and basic auth come from `.env` / environment (see `ClientConfig`).

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use foundry_chat_core::{
    render_references, sync_env_files, upsert_env_values, ChatClient, ChatMessage, ClientConfig,
    HttpUploader, UploadFile, UploadObserver, UploadRecord, UploadStatus, UploadTracker,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "foundry-chat", version, about = "Workshop RAG chat client")]
struct Cli {
    /// Backend base URL (overrides FOUNDRY_CHAT_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload documents for indexing.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Max uploads in flight (1 = one after another).
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Ask one question and print the answer with its references.
    Chat { question: String },
    /// Maintain a .env file.
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },
}

#[derive(Subcommand)]
enum EnvAction {
    /// Set KEY=VALUE pairs (rewrites existing keys in place, appends new ones).
    Set {
        file: PathBuf,
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Add keys missing from the live file, taken from the example file.
    Sync { example: PathBuf, live: PathBuf },
}

/// Prints each indexed document as soon as its upload succeeds.
struct PrintIndexed;

impl UploadObserver for PrintIndexed {
    fn on_upload_succeeded(&self, record: &UploadRecord) {
        println!(
            "indexed {} ({} chunks)",
            record.filename,
            record.chunks_count.unwrap_or(0)
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading any config
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    if let Err(e) = dotenv {
        tracing::debug!(".env not loaded: {} (using process environment)", e);
    }

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.api_url {
        config = config.with_api_base_url(url);
    }

    match cli.command {
        Command::Upload { files, concurrency } => upload(&config, files, concurrency).await,
        Command::Chat { question } => chat(&config, question).await,
        Command::Env { action } => env(action),
    }
}

async fn upload(
    config: &ClientConfig,
    paths: Vec<PathBuf>,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = UploadFile::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        files.push(file);
    }

    let tracker = UploadTracker::new(Arc::new(HttpUploader::new(config)?))
        .with_concurrency(concurrency.unwrap_or(config.upload_concurrency))
        .with_observer(Arc::new(PrintIndexed));
    let done = tracker.upload_batch(files).await;

    let mut failed = 0;
    for record in &done {
        match record.status {
            UploadStatus::Success => {}
            _ => {
                failed += 1;
                eprintln!(
                    "failed {}: {}",
                    record.filename,
                    record.message.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} upload(s) failed", failed, done.len());
    }
    Ok(())
}

async fn chat(config: &ClientConfig, question: String) -> anyhow::Result<()> {
    let client = ChatClient::new(config)?;
    let mut stdout = std::io::stdout();
    let mut write_error: Option<std::io::Error> = None;
    let reply = client
        .send_with(&[ChatMessage::user(question)], |delta| {
            if write_error.is_some() {
                return;
            }
            if let Err(e) = write!(stdout, "{}", delta).and_then(|_| stdout.flush()) {
                tracing::debug!("stdout write failed, dropping remaining deltas: {}", e);
                write_error = Some(e);
            }
        })
        .await?;
    if let Some(e) = write_error {
        return Err(e).context("writing answer to stdout");
    }
    println!();

    if let Some(panel) = render_references(&reply.annotations) {
        println!("\n{}", panel.trim_end());
    }
    if let Some(duration) = reply.duration {
        tracing::info!("Answered in {:.1}s", duration.as_secs_f32());
    }
    Ok(())
}

fn env(action: EnvAction) -> anyhow::Result<()> {
    match action {
        EnvAction::Set { file, pairs } => {
            let parsed = pairs
                .iter()
                .map(|p| {
                    p.split_once('=')
                        .with_context(|| format!("expected KEY=VALUE, got {:?}", p))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let report = upsert_env_values(&file, &parsed)?;
            println!(
                "{}: {} updated, {} added, {} unchanged",
                file.display(),
                report.updated.len(),
                report.appended.len(),
                report.unchanged.len()
            );
        }
        EnvAction::Sync { example, live } => {
            let added = sync_env_files(&example, &live)?;
            println!("{}: {} key(s) added", live.display(), added);
        }
    }
    Ok(())
}
