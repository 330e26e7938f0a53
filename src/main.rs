use std::path::PathBuf;
use std::sync::Arc;

use afk_bot::bot::bot_client::BotClient;
use afk_bot::bot::bot_listener::BridgeConnector;
use afk_bot::{AppError, BotConfig, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "afk-bot", about = "Keeps an idle game client connected", version, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("afk-bot starting...");

    let config = Arc::new(BotConfig::load(&args.config)?);
    info!(
        host = %config.client.host,
        port = config.client.port,
        username = %config.client.username,
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                c_shutdown.cancel();
            }
            Err(err) => error!(%err, "failed to listen for shutdown signal"),
        }
    });

    let mut client = BotClient::new(config, BridgeConnector);
    client.run(shutdown).await;
    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%H:%M:%S".to_owned()));
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))
}
