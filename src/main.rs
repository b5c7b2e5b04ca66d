//! slircbot binary: load the config, set up logging, run the bot.

use slircbot::bot::Bot;
use slircbot::config::{Config, validate};
use slircbot::error::BotError;
use slircbot::telemetry::StdoutWatch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let stdout = StdoutWatch::new();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(stdout.clone())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "slircbot.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    info!(
        nick = %config.identity.nick,
        address = %config.connection.address,
        tls = config.connection.tls,
        "Starting slircbot"
    );

    match Bot::new(config)?.with_stdout(stdout).run().await {
        // Nothing is left to write to.
        Err(BotError::BrokenPipe) => Ok(()),
        other => other.map_err(anyhow::Error::from),
    }
}
