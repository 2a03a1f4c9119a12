//! Runtime settings: command line and environment over the YAML config file
//! over built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::cadapter::s3::S3Config;
use crate::cli::{BackendKind, Cli, Command};
use crate::commands::{DEFAULT_CHUNK_SIZE, PipelineOptions};
use crate::error::{Result, S3napError};
use crate::transfer::pool::DEFAULT_WORKERS;

/// Contents of `config.yaml`. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub backend: Option<BackendKind>,
    pub root: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    pub force_path_style: Option<bool>,
    pub max_attempts: Option<u32>,
    pub chunk_size: Option<usize>,
    pub workers: Option<usize>,
    pub max_in_flight: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let cfg: FileConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
        Ok(cfg)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("s3nap").join("config.yaml"))
    }

    /// An explicit path must exist; the default location is optional.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BackendSettings {
    S3(S3Config),
    /// Directory holding the bucket's objects.
    Local(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendSettings,
    pub chunk_size: usize,
    pub workers: usize,
    pub pipeline: PipelineOptions,
}

impl Settings {
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self> {
        let bucket = cli.command.bucket();
        if bucket.is_empty() {
            return Err(S3napError::Configuration("bucket name is empty".into()));
        }

        let backend = match cli.backend.or(file.backend).unwrap_or(BackendKind::S3) {
            BackendKind::Local => {
                let root = cli.root.clone().or(file.root).ok_or_else(|| {
                    S3napError::Configuration("the local backend needs --root".into())
                })?;
                BackendSettings::Local(root.join(bucket))
            }
            BackendKind::S3 => {
                let access_key = cli.access_key.clone().or(file.access_key).ok_or_else(|| {
                    S3napError::Configuration("no access key (AWS_ACCESS_KEY_ID)".into())
                })?;
                let secret_key = cli.secret_key.clone().or(file.secret_key).ok_or_else(|| {
                    S3napError::Configuration("no secret key (AWS_SECRET_ACCESS_KEY)".into())
                })?;
                let mut s3 = S3Config::new(bucket, access_key, secret_key);
                if let Some(region) = cli.region.clone().or(file.region) {
                    s3.region = region;
                }
                s3.endpoint = cli.endpoint.clone().or(file.endpoint);
                s3.session_token = file.session_token;
                // Self-hosted stores rarely support virtual-hosted buckets.
                s3.force_path_style = file.force_path_style.unwrap_or(s3.endpoint.is_some());
                if let Some(attempts) = file.max_attempts {
                    s3.max_attempts = attempts.max(1);
                }
                BackendSettings::S3(s3)
            }
        };

        let (chunk_size, keep_stale) = match &cli.command {
            Command::Upload {
                chunk_size,
                keep_stale,
                ..
            } => (*chunk_size, *keep_stale),
            _ => (None, false),
        };
        let chunk_size = chunk_size
            .or(file.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(S3napError::InvalidChunkSize(chunk_size));
        }

        let workers = positive("workers", cli.workers.or(file.workers), DEFAULT_WORKERS)?;
        let defaults = PipelineOptions::default();
        let max_in_flight = positive(
            "max-in-flight",
            cli.max_in_flight.or(file.max_in_flight),
            defaults.max_in_flight,
        )?;

        Ok(Settings {
            backend,
            chunk_size,
            workers,
            pipeline: PipelineOptions {
                max_in_flight,
                prune_stale: !keep_stale,
                ..defaults
            },
        })
    }
}

fn positive(what: &str, value: Option<usize>, default: usize) -> Result<usize> {
    match value {
        Some(0) => Err(S3napError::Configuration(format!("{what} must be at least 1"))),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}
