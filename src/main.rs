// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use streamsave::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Download HLS and DASH streams into a single file",
    long_about = None
)]
struct Args {
    /// JSON config file; missing keys use their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download one stream and save it as a file
    Download {
        /// HLS (.m3u8) or DASH (.mpd) manifest
        manifest_url: Option<String>,

        /// Segment URL already observed, used when the manifest yields nothing
        #[arg(long = "segment")]
        segments: Vec<String>,

        /// Initialization segment for the observed segments
        #[arg(long)]
        init: Option<String>,

        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Extra request header, as "Name: value"
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
    /// Save or discard downloads left unsaved by an earlier run
    Recover {
        #[command(subcommand)]
        action: RecoverAction,
    },
    /// Show the progress records of known tasks
    Status,
    /// Forget a finished task and any bytes it left unsaved
    Remove { id: TaskId },
    /// Forget every finished task whose bytes are not waiting to be saved
    Clear,
}

#[derive(Subcommand, Debug)]
enum RecoverAction {
    List,
    Save {
        id: TaskId,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    Discard {
        id: TaskId,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected \"Name: value\", got {:?}", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamsave=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DownloaderConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DownloaderConfig::default(),
    };

    match args.command {
        Command::Download { manifest_url, segments, init, out, headers } => {
            let request = StartRequest { manifest_url, segments, init_segment_url: init };
            download(config, request, headers, &out).await
        }
        Command::Recover { action } => recover(config, action).await,
        Command::Status => status(config).await,
        Command::Remove { id } => {
            let registry = open_registry(config).await?;
            if !registry.remove(id).await? {
                bail!("task {} is still running", id);
            }
            println!("Removed {}", id);
            Ok(())
        }
        Command::Clear => {
            let registry = open_registry(config).await?;
            let removed = registry.clear_finished().await?;
            println!("Removed {} finished task(s).", removed);
            Ok(())
        }
    }
}

async fn open_store(config: &DownloaderConfig) -> Result<TaskStore> {
    TaskStore::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

async fn open_registry(config: DownloaderConfig) -> Result<TaskRegistry> {
    let store = open_store(&config).await?;
    let transport = HttpTransport::new(&config).context("Failed to build HTTP client")?;
    Ok(TaskRegistry::new(store, Arc::new(transport), config).await?)
}

fn print_report(report: &SaveReport) {
    println!(
        "Saved {} ({}, sha256 {})",
        report.path.display(),
        format_bytes(report.bytes),
        report.sha256
    );
}

async fn download(
    mut config: DownloaderConfig,
    request: StartRequest,
    headers: Vec<(String, String)>,
    out: &Path,
) -> Result<()> {
    if request.manifest_url.is_none() && request.segments.is_empty() {
        bail!("nothing to download: pass a manifest URL or at least one --segment");
    }
    config.headers.extend(headers);

    let store = open_store(&config).await?;
    let leftovers = RecoveryScanner::new(store.clone()).scan().await?;
    if !leftovers.is_empty() {
        warn!(count = leftovers.len(), "unsaved downloads found, see `streamsave recover list`");
    }

    let transport = HttpTransport::new(&config).context("Failed to build HTTP client")?;
    let saver = DiskSaver::new(store.clone(), out, config.save_grace());
    let registry = TaskRegistry::new(store, Arc::new(transport), config).await?;

    // subscribe first so ReadyToSave cannot be missed
    let mut events = registry.subscribe();
    let id = registry.start(request).await?;
    info!(task_id = id, "download started");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut canceling = false;
    let mut saved: Option<SaveReport> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !canceling => {
                canceling = true;
                warn!(task_id = id, "interrupt received, canceling");
                registry.cancel(id).await;
            }
            event = events.recv() => match event {
                Ok(snapshot) if snapshot.id == id => {
                    info!(
                        task_id = id,
                        state = %snapshot.state,
                        progress = %format!("{:.0}%", snapshot.progress() * 100.0),
                        "{}",
                        snapshot.status_text
                    );
                    if snapshot.state == TaskState::ReadyToSave && saved.is_none() {
                        saved = Some(save_or_keep(&saver, id).await?);
                    }
                    if snapshot.state.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let Some(last) = registry.wait(id).await else {
        bail!("task {} disappeared", id);
    };
    match last.state {
        TaskState::Completed => {
            let report = match saved {
                Some(report) => report,
                None => save_or_keep(&saver, id).await?,
            };
            println!("{}", last.status_text);
            print_report(&report);
            Ok(())
        }
        TaskState::Canceled => bail!("{}", last.status_text),
        _ => bail!("download failed: {}", last.status_text),
    }
}

async fn save_or_keep(saver: &DiskSaver, id: TaskId) -> Result<SaveReport> {
    saver.save(id).await.with_context(|| {
        format!(
            "Failed to save task {}; the data is kept, retry with `streamsave recover save {}`",
            id, id
        )
    })
}

async fn recover(config: DownloaderConfig, action: RecoverAction) -> Result<()> {
    let store = open_store(&config).await?;
    let scanner = RecoveryScanner::new(store.clone());

    match action {
        RecoverAction::List => {
            let found = scanner.scan().await?;
            if found.is_empty() {
                println!("Nothing to recover.");
            }
            for r in found {
                let state =
                    r.state.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string());
                println!(
                    "{}  {:<10}  {:>10}  {}",
                    r.id,
                    state,
                    format_bytes(r.total_bytes),
                    r.filename
                );
            }
        }
        RecoverAction::Save { id, out } => {
            let saver = DiskSaver::new(store, out, config.save_grace());
            let report = scanner.save(&saver, id).await?;
            print_report(&report);
        }
        RecoverAction::Discard { id } => {
            if !scanner.discard(id).await? {
                bail!("no stored download with id {}", id);
            }
            println!("Discarded {}", id);
        }
    }
    Ok(())
}

async fn status(config: DownloaderConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let records = store.list_progress().await?;
    if records.is_empty() {
        println!("No downloads recorded.");
    }
    for record in records {
        let s = record.snapshot;
        println!(
            "{}  {:<16}  {:>5.1}%  {:>8}  {}  {}{}",
            s.id,
            s.state.to_string(),
            s.progress() * 100.0,
            format_duration(s.duration),
            s.filename,
            s.status_text,
            if record.saved { "  [saved]" } else { "" }
        );
    }
    Ok(())
}
