#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for bucket sync.
//!
//! Credentials and endpoint come from the environment (see
//! [`bucket_sync::s3`]). Uses `indicatif-log-bridge` (via
//! [`bucket_sync_cli_utils::init_logger`]) so log lines and the progress bar
//! never fight for the terminal. Ctrl-C cancels in-flight transfers; the
//! summary is still printed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bucket_sync::s3::S3Store;
use bucket_sync::{
    CancellationToken, DEFAULT_CONCURRENCY, SyncClient, SyncMode, SyncOptions, TransferSummary,
};
use bucket_sync_cli_utils::IndicatifProgress;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bucket_sync",
    about = "Sync a local directory tree with an S3-compatible bucket"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload every file under a local directory
    Push {
        #[command(flatten)]
        args: SyncArgs,
        /// Fail instead of creating the bucket when it does not exist
        #[arg(long)]
        no_create_bucket: bool,
    },
    /// Download every object under a key prefix
    Pull {
        #[command(flatten)]
        args: SyncArgs,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// Local directory to sync
    root: PathBuf,
    /// Bucket name
    #[arg(long)]
    bucket: String,
    /// Key prefix inside the bucket
    #[arg(long, default_value = "")]
    prefix: String,
    /// Skip files whose MD5 matches the remote `md5` metadata
    #[arg(long)]
    sync: bool,
    /// Maximum number of transfers in flight
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
    /// Print the full summary as JSON
    #[arg(long)]
    json: bool,
}

impl SyncArgs {
    fn options(&self) -> SyncOptions {
        SyncOptions::new(&self.bucket)
            .with_prefix(&self.prefix)
            .with_mode(SyncMode::from_sync_flag(self.sync))
            .with_concurrency(self.concurrency)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = bucket_sync_cli_utils::init_logger();
    let cli = Cli::parse();

    let store = match S3Store::from_env().await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("S3 not configured: {e}");
            log::error!("Set S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY together, or neither");
            return Err(e.into());
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, cancelling in-flight transfers...");
                cancel.cancel();
            }
        }
    });

    let start = Instant::now();
    let (verb, args, summary) = match &cli.command {
        Commands::Push {
            args,
            no_create_bucket,
        } => {
            let progress = IndicatifProgress::files_bar(&multi, "Pushing");
            let client = SyncClient::new(store).with_progress(progress);
            let options = args.options().with_ensure_bucket(!no_create_bucket);
            ("Push", args, client.push(&args.root, &options, &cancel).await?)
        }
        Commands::Pull { args } => {
            let progress = IndicatifProgress::files_bar(&multi, "Pulling");
            let client = SyncClient::new(store).with_progress(progress);
            ("Pull", args, client.pull(&args.root, &args.options(), &cancel).await?)
        }
    };

    report(verb, args.json, &summary, start)?;

    if !summary.is_complete() {
        std::process::exit(1);
    }
    Ok(())
}

fn report(
    verb: &str,
    json: bool,
    summary: &TransferSummary,
    start: Instant,
) -> Result<(), serde_json::Error> {
    for failure in summary.failures() {
        log::error!(
            "{} ({}): {}",
            failure.file_path.display(),
            failure.object_key,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!(
            "{verb} complete: {summary} in {:.1}s",
            start.elapsed().as_secs_f64()
        );
    }

    Ok(())
}
