//! CLI module for s3chunk
//!
//! # Usage
//!
//! ```bash
//! # Upload with settings from the environment (S3CHUNK_*)
//! s3chunk upload ./video.mp4 --key media/video.mp4
//!
//! # Upload with a YAML config and 8 MiB parts
//! s3chunk --config upload.yaml upload ./backup.tar --part-size 8388608
//!
//! # Show the part layout only
//! s3chunk plan ./backup.tar --format json
//! ```

pub mod args;
pub mod handler;

use anyhow::{Context, Result};
use tracing::{debug, info};

use args::{Cli, Commands};

/// Run the CLI application
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.debug)?;

    cli.validate().context("Invalid arguments")?;

    // Set insecure TLS before the transport is built
    if cli.insecure {
        std::env::set_var("S3CHUNK_INSECURE_TLS", "true");
    }

    debug!("CLI arguments: {:?}", cli);

    // One upload is one sequential chain of requests
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let settings = crate::config::load_settings(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Upload {
            file,
            key,
            part_size,
            no_progress,
        } => {
            handler::execute_upload(&file, key, part_size, !no_progress, settings, cli.format)
                .await?;
        }
        Commands::Plan { file, part_size } => {
            handler::execute_plan(&file, part_size, settings, cli.format).await?;
        }
    }

    info!("Command completed successfully");
    Ok(())
}

/// Initialize logging based on verbosity flags
fn init_logging(verbose: bool, debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .init();

    Ok(())
}
