use anyhow::Result;
use dotenvy::dotenv;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use chxt::core::Config;
use chxt::dashboard::ConnectionRegistry;
use chxt::database::Database;
use chxt::dispatch::{CommandResolver, Dispatcher};
use chxt::irc::IrcConnection;
use chxt::sandbox::{AskClient, SandboxExecutor};

/// How often expired dashboard tokens are swept
const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let config_path = std::env::var("CHXT_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded configuration from {config_path}");

    let database = Database::open(&config.database.path, config.auth.token_ttl_hours)?;

    // Expired tokens are swept on a timer instead of piling up
    {
        let database = database.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TOKEN_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(sweep_error) = database.sweep_expired_tokens() {
                    warn!("Token sweep failed: {sweep_error}");
                }
            }
        });
    }

    // chxt.ask is only wired up when a model is configured; the openai
    // crate picks its key up from OPENAI_KEY in the environment
    let ask = std::env::var("CHXT_ASK_MODEL").ok().map(AskClient::new);
    if ask.is_none() {
        info!("CHXT_ASK_MODEL not set; the chxt.ask capability is disabled");
    }

    let registry = Arc::new(ConnectionRegistry::new());
    for server in config.servers() {
        let dispatcher = Arc::new(Dispatcher::new(
            CommandResolver::new(Arc::new(database.clone())),
            SandboxExecutor::new(&config.sandbox, ask.clone()),
            Arc::new(database.clone()),
            config.auth.clone(),
        ));
        let connection = Arc::new(IrcConnection::new(server, &config.history, dispatcher));
        registry.register(Arc::clone(&connection));
        tokio::spawn(connection.run());
    }

    info!(
        "chxt is up with {} connection(s)",
        registry.connection_status().len()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
