//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Run the verification-and-upload pipeline once against one local folder.
#[derive(Parser, Debug)]
#[command(name = "dataset-courier")]
#[command(author, version, about)]
pub struct Args {
    /// Local folder to mirror.
    pub folder: PathBuf,

    /// Server-assigned dataset id this folder mirrors into.
    #[arg(long)]
    pub dataset_id: u64,

    /// Server-side dataset URI.
    #[arg(long)]
    pub dataset_uri: String,

    /// Path to a TOML config file (defaults to ./dataset-courier.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Override the configured verification pool size.
    #[arg(long)]
    pub verification_workers: Option<usize>,

    /// Override the configured upload pool size.
    #[arg(long)]
    pub upload_workers: Option<usize>,

    #[arg(long)]
    pub server_url: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub staging_host: Option<String>,

    #[arg(long)]
    pub staging_username: Option<String>,

    #[arg(long)]
    pub private_key_path: Option<PathBuf>,

    /// Test/dry-run hook: a reserved digest string returned without
    /// reading any file (spec.md §6).
    #[arg(long)]
    pub fake_digest: Option<String>,
}
