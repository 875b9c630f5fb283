use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tumblr_backup::config::{self, Credentials};
use tumblr_backup::pipeline::{BackupPipeline, BackupSettings};
use tumblr_backup::tumblr::TumblrClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Back up an entire Tumblr to a single database")]
struct Args {
    /// Name of Tumblr to back up
    #[arg(long)]
    tumblr_name: String,

    /// Filename of database to back up into
    #[arg(long)]
    db_file: PathBuf,

    /// Tumblr API key file (consumer key, consumer secret, token, token secret)
    #[arg(long)]
    key_file: PathBuf,

    /// Optional YAML settings file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let settings = config::load(args.config.as_deref()).context("failed to load settings")?;
    let credentials = Credentials::from_key_file(&args.key_file)
        .with_context(|| format!("failed to read key file {}", args.key_file.display()))?;

    let client = TumblrClient::new(credentials, settings.api_base()?)
        .context("failed to build HTTP client")?;
    let pipeline = BackupPipeline::new(
        client,
        BackupSettings {
            page_size: settings.backup.page_size,
            batch_size: settings.backup.batch_size,
            retry: settings.retry_policy(),
        },
    )?;

    let report = pipeline
        .run(&args.tumblr_name, &args.db_file)
        .await
        .with_context(|| format!("backup of {} failed", args.tumblr_name))?;

    info!(
        run_id = %report.run_id,
        posts = report.posts_written,
        batches = report.batches_written,
        "done"
    );
    Ok(())
}
