use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use keyturn::auth::SessionService;
use keyturn::config::Config;
use keyturn::{db, gateway, logging};

/// Access/refresh token service.
#[derive(Parser, Debug)]
#[command(name = "keyturn", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP gateway.
    Serve {
        /// Path to config.toml (defaults to $KEYTURN_CONFIG, then the user config dir).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `[gateway] host`.
        #[arg(long)]
        host: Option<String>,
        /// Override `[gateway] port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create the database schema and exit.
    InitDb {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, host, port } => {
            let config = Config::load(config.as_deref())?;
            logging::init(config.env)?;

            let settings = config.token_settings()?;
            let db_config = config.database.clone();
            let pool = tokio::task::spawn_blocking(move || db::open_pool(&db_config))
                .await
                .context("Database setup task failed")??;

            let sessions = SessionService::sqlite(pool, settings, config.operation_timeout());
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);

            tracing::info!(env = ?config.env, "Starting keyturn");
            gateway::run_gateway(&host, port, &config, sessions).await
        }
        Command::InitDb { config } => {
            let config = Config::load(config.as_deref())?;
            logging::init(config.env)?;

            let db_config = config.database.clone();
            tokio::task::spawn_blocking(move || db::open_pool(&db_config))
                .await
                .context("Database setup task failed")??;
            tracing::info!(path = %config.database.path.display(), "Schema ready");
            Ok(())
        }
    }
}
