use crate::config;
use anyhow::Context;
use clap::Parser;
use std::time::Duration;

#[derive(clap::Parser, Debug)]
#[command(name = "hashcrack-worker", version, about = "Distributed MD5 crack worker")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(
        long,
        global = true,
        env = "CONFIG_FILE",
        default_value = config::DEFAULT_CONFIG_PATH
    )]
    pub config: std::path::PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Run the worker server.
    Server,
    /// Probe the local server's liveness endpoint.
    Healthcheck,
    /// Print the version.
    Version,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Server => {
            let cfg = config::load(&cli.config)?;
            crate::server::run(cfg).await
        }
        Command::Healthcheck => {
            let cfg = config::load(&cli.config)?;
            healthcheck(cfg.server.port).await
        }
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn healthcheck(port: u16) -> anyhow::Result<()> {
    let url = format!("http://127.0.0.1:{port}/api/worker/health/liveness");
    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .context("healthcheck request failed")?;
    anyhow::ensure!(
        response.status().is_success(),
        "healthcheck returned {}",
        response.status()
    );
    Ok(())
}
