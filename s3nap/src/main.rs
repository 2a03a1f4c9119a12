use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use s3nap::cadapter::client::{ObjectBackend, ObjectClient};
use s3nap::cadapter::localfs::LocalFsBackend;
use s3nap::cadapter::s3::S3Backend;
use s3nap::cli::{Cli, Command};
use s3nap::commands::list::write_inventory;
use s3nap::config::{BackendSettings, FileConfig, Settings};
use s3nap::transfer::TransferPool;
use s3nap::{ChunkedStore, S3napError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    // stdout carries download data, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(S3napError::NotFound(name)) = err.downcast_ref::<S3napError>() {
                warn!(name = %name, "no chunks stored under this name");
                return ExitCode::from(2);
            }
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file = FileConfig::discover(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, file).context("invalid configuration")?;
    let pool = TransferPool::current(settings.workers);

    match &settings.backend {
        BackendSettings::S3(s3) => {
            info!(bucket = %s3.bucket, endpoint = ?s3.endpoint, "using S3 backend");
            let backend = S3Backend::new(s3.clone()).await;
            execute(ObjectClient::new(backend), pool, &cli.command, &settings).await
        }
        BackendSettings::Local(dir) => {
            info!(dir = %dir.display(), "using local backend");
            let backend = LocalFsBackend::new(dir);
            execute(ObjectClient::new(backend), pool, &cli.command, &settings).await
        }
    }
}

async fn execute<B: ObjectBackend + 'static>(
    client: ObjectClient<B>,
    pool: TransferPool,
    command: &Command,
    settings: &Settings,
) -> anyhow::Result<()> {
    let store = ChunkedStore::new(client, pool).with_options(settings.pipeline.clone());
    match command {
        Command::Upload { name, .. } => {
            store
                .upload(tokio::io::stdin(), name, settings.chunk_size)
                .await
                .with_context(|| format!("upload of {name} failed"))?;
        }
        Command::Download { name, .. } => {
            let mut stdout = tokio::io::stdout();
            store
                .download(name, &mut stdout)
                .await
                .with_context(|| format!("download of {name} failed"))?;
        }
        Command::List { bucket, prefix } => {
            let entries = store.inventory(prefix).await.context("listing failed")?;
            write_inventory(bucket, &entries, &mut tokio::io::stderr()).await?;
        }
        Command::Delete { prefix, .. } => {
            let removed = store
                .delete_prefix(prefix)
                .await
                .with_context(|| format!("delete of {prefix} failed"))?;
            info!(prefix, removed, "done");
        }
    }
    Ok(())
}
