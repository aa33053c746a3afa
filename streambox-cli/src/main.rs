mod cli;
mod commands;
mod error;
mod logging;

use std::process;

use clap::Parser;
use mimalloc::MiMalloc;
use reqwest::Client;
use tracing::error;

use crate::cli::{Args, Commands};
use crate::commands::{ListOptions, PlayOptions};
use crate::error::{AppError, Result};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = logging::init_logging(args.verbose, args.quiet) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let client = Client::builder()
        .user_agent(streambox_engine::config::DEFAULT_USER_AGENT)
        .build()
        .map_err(|e| AppError::InvalidInput(format!("Cannot build HTTP client: {e}")))?;

    match args.command {
        Commands::List {
            playlist,
            group,
            limit,
            json,
        } => {
            commands::list(
                &client,
                ListOptions {
                    playlist,
                    group,
                    limit,
                    json,
                },
            )
            .await
        }
        Commands::Play {
            url,
            channel,
            playlist,
            output,
            config,
            activity,
        } => {
            commands::play(
                &client,
                PlayOptions {
                    url,
                    channel,
                    playlist,
                    output,
                    config,
                    activity,
                },
            )
            .await
        }
    }
}
