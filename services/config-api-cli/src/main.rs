//! `attestation-config-api`: uploads and deletes attestation version thresholds.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use tracing::error;

use attcfg_core::{ApiConfig, Variant, VersionDate};

mod commands;
mod report;

use commands::Api;

#[derive(Parser)]
#[command(name = "attestation-config-api")]
#[command(about = "Publish signed minimum attestation versions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Bucket region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Bucket holding the published objects
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Log writes instead of performing them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Read the current latest version through the public CDN instead of the bucket
    #[arg(long, global = true)]
    verify_from_cdn: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache a reported version and publish the new minimum if it advanced
    Upload {
        /// aws-sev-snp, azure-sev-snp, gcp-sev-snp, azure-tdx (or aws, azure, gcp)
        variant: Variant,
        /// Report file
        report: PathBuf,
        /// Publish the report as latest without comparison
        #[arg(long)]
        force: bool,
        /// Number of recent observations the minimum is taken over
        #[arg(long)]
        cache_window_size: Option<usize>,
        /// Observation date, YYYY-MM-DD or YYYY-MM-DD-HH-MM (default: now)
        #[arg(long)]
        upload_date: Option<VersionDate>,
    },
    /// Delete a published version, or a whole variant with `delete recursive`
    Delete(DeleteArgs),
}

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
struct DeleteArgs {
    #[command(subcommand)]
    command: Option<DeleteCommand>,
    variant: Option<Variant>,
    /// Version name, e.g. 2023-06-11-14-30 or 2023-06-11-14-30.json
    version: Option<String>,
}

#[derive(Subcommand)]
enum DeleteCommand {
    /// Delete every object of a variant
    Recursive { variant: Variant },
}

#[tokio::main]
async fn main() -> Result<()> {
    attcfg_core::init_tracing("attestation-config-api")?;
    let cli = Cli::parse();

    let mut cfg = ApiConfig::load()?;
    if let Some(region) = cli.region { cfg.region = region; }
    if let Some(bucket) = cli.bucket { cfg.bucket = bucket; }
    cfg.dry_run |= cli.dry_run;
    cfg.validate()?;

    let api = Api::connect(cfg, cli.verify_from_cdn)?;
    let res = run(&api, cli.command).await;
    let flushed = api.close().await;
    match (res, flushed) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => {
            error!(error = %format!("{e:#}"), "command failed");
            Err(e)
        }
        (Err(e), Err(flush)) => {
            error!(error = %format!("{e:#}"), flush_error = %format!("{flush:#}"), "command and invalidation failed");
            Err(e.context(format!("also failed to invalidate CDN cache: {flush:#}")))
        }
    }
}

async fn run(api: &Api, command: Commands) -> Result<()> {
    match command {
        Commands::Upload { variant, report, force, cache_window_size, upload_date } => {
            api.upload(variant, &report, force, cache_window_size, upload_date).await.map(|_| ())
        }
        Commands::Delete(DeleteArgs { command: Some(DeleteCommand::Recursive { variant }), .. }) => api.delete_recursive(variant).await.map(|_| ()),
        Commands::Delete(DeleteArgs { command: None, variant: Some(variant), version: Some(version) }) => api.delete(variant, &version).await,
        Commands::Delete(_) => Err(anyhow!("delete needs <variant> <version>, or `delete recursive <variant>`")),
    }
}
