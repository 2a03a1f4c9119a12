use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "s3nap", version)]
#[command(about = "Chunked backup of stdin to an S3 bucket, and restore to stdout", long_about = None)]
pub struct Cli {
    /// YAML config file [default: <config dir>/s3nap/config.yaml]
    #[arg(long, global = true, env = "S3NAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Object store backend
    #[arg(long, global = true, env = "S3NAP_BACKEND", value_enum)]
    pub backend: Option<BackendKind>,

    /// Root directory of the local backend, one subdirectory per bucket
    #[arg(long, global = true, env = "S3NAP_ROOT")]
    pub root: Option<PathBuf>,

    /// Endpoint of an S3-compatible service
    #[arg(long, global = true, env = "S3NAP_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, global = true, env = "S3NAP_REGION")]
    pub region: Option<String>,

    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key: Option<String>,

    #[arg(long, global = true, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Concurrent object store requests
    #[arg(long, global = true, env = "S3NAP_WORKERS")]
    pub workers: Option<usize>,

    /// Chunks outstanding at once; they are still applied in order
    #[arg(long, global = true, env = "S3NAP_MAX_IN_FLIGHT")]
    pub max_in_flight: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[command(about = "Store stdin as chunks of <NAME> using ./s3nap upload bucket name")]
    Upload {
        bucket: String,
        name: String,
        /// Bytes per chunk object
        #[arg(long, env = "S3NAP_CHUNK_SIZE")]
        chunk_size: Option<usize>,
        /// Keep chunks of a previous, longer upload of the same name
        #[arg(long)]
        keep_stale: bool,
    },
    #[command(about = "Write the chunks of <NAME> to stdout using ./s3nap download bucket name")]
    Download { bucket: String, name: String },
    #[command(about = "Print one line per logical file to stderr")]
    List {
        bucket: String,
        #[arg(long, default_value = "")]
        prefix: String,
    },
    #[command(about = "Delete every object whose key starts with <PREFIX>")]
    Delete { bucket: String, prefix: String },
}

impl Command {
    pub fn bucket(&self) -> &str {
        match self {
            Command::Upload { bucket, .. }
            | Command::Download { bucket, .. }
            | Command::List { bucket, .. }
            | Command::Delete { bucket, .. } => bucket,
        }
    }
}

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    S3,
    Local,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upload() {
        let cli = Cli::try_parse_from([
            "s3nap",
            "upload",
            "backups",
            "host/etc",
            "--chunk-size",
            "1024",
            "--keep-stale",
            "--backend",
            "local",
        ])
        .unwrap();
        assert_eq!(cli.backend, Some(BackendKind::Local));
        assert_eq!(cli.command.bucket(), "backups");
        assert_eq!(
            cli.command,
            Command::Upload {
                bucket: "backups".into(),
                name: "host/etc".into(),
                chunk_size: Some(1024),
                keep_stale: true,
            }
        );
    }

    #[test]
    fn test_list_prefix_defaults_to_everything() {
        let cli = Cli::try_parse_from(["s3nap", "list", "b"]).unwrap();
        assert_eq!(
            cli.command,
            Command::List {
                bucket: "b".into(),
                prefix: String::new(),
            }
        );
    }

    #[test]
    fn test_delete_requires_prefix() {
        assert!(Cli::try_parse_from(["s3nap", "delete", "b"]).is_err());
    }
}
