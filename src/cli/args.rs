use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// s3chunk - chunked S3 multipart uploads signed by a remote service
#[derive(Parser, Debug)]
#[command(name = "s3chunk")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file, layered over S3CHUNK_* environment variables
    #[arg(long, global = true, env = "S3CHUNK_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Disable TLS certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a file with a multipart upload
    Upload {
        /// Local file to upload
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Destination object key (defaults to the configured key, then the file name)
        #[arg(long)]
        key: Option<String>,

        /// Part size in bytes
        #[arg(long)]
        part_size: Option<u64>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show how a file would be split into parts, without uploading
    Plan {
        /// Local file to inspect
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Part size in bytes
        #[arg(long)]
        part_size: Option<u64>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Upload { part_size, .. } | Commands::Plan { part_size, .. } => {
                if *part_size == Some(0) {
                    anyhow::bail!("--part-size must be greater than zero");
                }
            }
        }
        Ok(())
    }
}
