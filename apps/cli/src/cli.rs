//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Expiry used for API keys created without `--expiry`.
pub const DEFAULT_KEY_EXPIRY: &str = "2050-01-01T00:00:00.000Z";

#[derive(Parser, Debug)]
#[command(
    name = "packdrop",
    version,
    about = "Upload files to a delivery service package"
)]
pub struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Configuration file. Defaults to the per-user location.
    ///
    /// Environment variable: `PACKDROP_CONFIG`
    #[arg(long, global = true, env = "PACKDROP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a package, upload files into it and finalize it.
    Upload(UploadArgs),

    /// Exchange account credentials for a user token.
    Auth(AuthArgs),

    /// Create a team API key.
    ApiKey(ApiKeyArgs),
}

#[derive(clap::Args, Debug)]
pub struct UploadArgs {
    /// Package name.
    #[arg(long)]
    pub name: String,

    #[arg(long, default_value_t = String::new())]
    pub description: String,

    /// Recipient email. Repeat for several recipients.
    #[arg(short, long = "recipient", required = true)]
    pub recipients: Vec<String>,

    /// Override the configured part size, in bytes.
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Override the configured number of parallel part uploads.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Files to upload, in order.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl UploadArgs {
    /// Applies flag overrides on top of file and environment settings.
    pub fn apply(&self, config: &mut Config) {
        if let Some(size) = self.part_size {
            config.part_size = size;
        }
        if let Some(n) = self.concurrency {
            config.max_concurrency = n;
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct AuthArgs {
    #[arg(long)]
    pub email: String,

    /// Environment variable: `PACKDROP_PASSWORD`
    #[arg(long, env = "PACKDROP_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Store the token in the configuration file.
    #[arg(long, default_value_t = false)]
    pub save: bool,
}

#[derive(clap::Args, Debug)]
pub struct ApiKeyArgs {
    /// Key name shown in the team settings.
    #[arg(long)]
    pub name: String,

    /// RFC 3339 expiry timestamp.
    #[arg(long, default_value_t = String::from(DEFAULT_KEY_EXPIRY))]
    pub expiry: String,
}
