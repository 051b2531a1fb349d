//! CLI entry point for a single dataset-mirroring pipeline run.

use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;
use courier_core::config::{Config, Overrides};
use courier_core::model::{LocalFile, LocalFileId};
use courier_core::{CatalogClient, Coordinator, DatasetRef, RunOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("dataset-courier starting");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("dataset-courier.toml"));
    let overrides = Overrides {
        num_verification_workers: args.verification_workers,
        num_upload_workers: args.upload_workers,
        server_url: args.server_url.clone(),
        username: args.username.clone(),
        api_key: args.api_key.clone(),
        staging_host: args.staging_host.clone(),
        staging_username: args.staging_username.clone(),
        private_key_path: args.private_key_path.clone(),
        fake_digest: args.fake_digest.clone(),
    };
    let config = Config::load(&config_path, overrides)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let dataset = DatasetRef {
        id: args.dataset_id,
        uri: args.dataset_uri.clone(),
    };

    let files = scan_folder(&args.folder, dataset.id)
        .with_context(|| format!("scanning folder {}", args.folder.display()))?;
    info!(files = files.len(), "folder scan complete");
    if files.is_empty() {
        info!("no files found, nothing to do");
        return Ok(());
    }

    let catalog = CatalogClient::new(config.server_url.clone(), config.credentials());
    let events = courier_core::EventBus::new();

    let coordinator = Coordinator::start(
        catalog,
        &config.server_url,
        config.credentials(),
        &dataset.uri,
        events.clone(),
        config.run_options(),
    )
    .await
    .context("negotiating transfer mode with the catalog")?;

    info!(mode = ?coordinator.mode(), "transfer mode resolved");

    let mut subscriber = events.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = subscriber.recv().await {
            if let courier_core::PipelineEvent::ShowMessage { title, message, .. } = event {
                warn!(%title, %message, "pipeline notice");
            }
        }
    });

    coordinator.enqueue(files, &dataset);
    let outcome = coordinator.await_quiescence().await;

    let status = coordinator.status().clone();
    info!(
        completed = status.completed_count(),
        failed = status.failed_count(),
        duplicates = status.duplicate_count(),
        completed_size = status.completed_size(),
        "run finished"
    );

    coordinator.shutdown().await;
    watcher.abort();

    match outcome {
        RunOutcome::Success => Ok(()),
        RunOutcome::Failed => anyhow::bail!("run finished with failures"),
        RunOutcome::Canceled => anyhow::bail!("run was canceled"),
    }
}

/// Non-recursive folder scan producing [`LocalFile`]s for one run
/// (spec.md §1: folder discovery is an external collaborator; SPEC_FULL.md
/// §2 component J names the minimal scan needed for a standalone binary).
fn scan_folder(folder: &std::path::Path, folder_id: u64) -> Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    for (index, entry) in std::fs::read_dir(folder)?.enumerate() {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        files.push(LocalFile {
            id: LocalFileId {
                folder_id,
                file_index: index as u64,
            },
            path: entry.path(),
            size: metadata.len(),
            created_time: metadata.created().unwrap_or(SystemTime::UNIX_EPOCH),
            relative_directory: String::new(),
        });
    }
    Ok(files)
}
