mod cli;
mod client;
mod config;
mod engine;
mod error;
mod server;
mod service;
mod state_machine;
mod store;
mod supervisor;
mod ui;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use client::StemsplitClient;
use config::StemsplitConfig;
use state_machine::{JobId, JobStatus};
use ui::JobProgress;

/// How often the CLI polls a job while watching it.
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides; --verbose => debug; else info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "stemsplit=debug,tower_http=debug"
        } else {
            "stemsplit=info,tower_http=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match cli.command {
        Command::Serve { host, port } => {
            let mut config = StemsplitConfig::load(cli.config.as_deref())?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            server::run_http(&config).await
        }
        Command::Submit {
            file,
            server,
            no_wait,
        } => {
            let client = StemsplitClient::new(&server)?;
            let id = submit(&client, &file).await?;
            println!("{id}");
            if no_wait {
                return Ok(());
            }
            watch(&client, &id).await
        }
        Command::Watch { job_id, server } => {
            let client = StemsplitClient::new(&server)?;
            watch(&client, &JobId::from(job_id)).await
        }
    }
}

async fn submit(client: &StemsplitClient, file: &Path) -> Result<JobId> {
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }
    client
        .submit(file)
        .await
        .with_context(|| format!("failed to submit {}", file.display()))
}

/// Polls the job until it reaches a terminal status; fails if the job failed.
async fn watch(client: &StemsplitClient, id: &JobId) -> Result<()> {
    let progress = JobProgress::start(id.as_str());
    let mut ticker = tokio::time::interval(WATCH_INTERVAL);
    loop {
        ticker.tick().await;
        let view = client.progress(id).await?;
        progress.update(&view);
        if view.status.is_terminal() {
            progress.complete(&view, |url| client.artifact_url(url));
            if view.status == JobStatus::Error {
                bail!("job {id} failed");
            }
            return Ok(());
        }
    }
}
