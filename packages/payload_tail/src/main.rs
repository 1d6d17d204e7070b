use anyhow::{Context, Result, bail};
use clap::Parser;
use payload_channel::{SessionLifecycleController, TcpConnector};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

mod config;
mod host;

use crate::config::Overrides;
use crate::host::{OutputFormat, StdoutHost};

#[derive(Parser)]
#[command(name = "payload-tail")]
#[command(about = "Tail a remote log channel to stdout")]
struct Cli {
    /// Config file (defaults to ~/.payload-tail/config.toml)
    #[arg(long, env = "PAYLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Channel guid
    #[arg(long)]
    guid: Option<String>,

    /// Channel password
    #[arg(long)]
    password: Option<String>,

    /// Broker and gateway host
    #[arg(long)]
    host: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only events.
    let default_directive = if cli.debug {
        "payload_tail=debug,payload_channel=debug,info"
    } else {
        "payload_tail=info,payload_channel=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_path = cli.config.clone().or_else(config::default_config_path);
    let config = config::resolve(
        config_path.as_deref(),
        Overrides {
            guid: cli.guid,
            password: cli.password,
            host: cli.host,
        },
    )
    .context("failed to load configuration")?;

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let (host, mut failed) = StdoutHost::new(format);
    let connector = TcpConnector::from_config(&config.gateway);
    let receiver = SessionLifecycleController::new(connector, host, config);

    receiver
        .start()
        .await
        .context("failed to start receiver")?;

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("interrupted, shutting down");
            None
        }
        reason = &mut failed => reason.ok(),
    };

    receiver.shutdown().await;

    if let Some(reason) = outcome {
        bail!("receiver stopped: {reason}");
    }
    Ok(())
}
