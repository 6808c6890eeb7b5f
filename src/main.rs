use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use trendscope::config::{AppConfig, DatabaseUrl, ServerConfig};
use trendscope::server::{AppState, create_router};
use trendscope::store::{SqliteStore, Store};

const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Parser)]
#[command(name = "trendscope")]
#[command(about = "Trending repository discovery service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "5000", env = "PORT")]
        port: u16,
    },

    /// Create the database schema and exit
    Init {
        /// Database location (sqlite://<path> or sqlite::memory:)
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

fn run_init(database_url: &str) -> anyhow::Result<()> {
    let url = DatabaseUrl::parse(database_url)?;
    let store = SqliteStore::open(&url).context("failed to open database")?;
    store.initialize()?;

    match &url {
        DatabaseUrl::File(path) => println!("Database initialized at {}", path.display()),
        DatabaseUrl::Memory => println!("In-memory database initialized (nothing persisted)"),
    }

    Ok(())
}

async fn run_serve(server: ServerConfig) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    if !config.production {
        info!("Running outside production; error responses include details");
    }

    let state = Arc::new(AppState::from_config(&config).await?);

    let pruner = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let removed = pruner.sessions.prune_expired();
            if removed > 0 {
                tracing::debug!("Pruned {removed} expired sessions");
            }
        }
    });

    let app = create_router(state);
    let addr = server.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trendscope=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { database_url } => run_init(&database_url)?,
        Commands::Serve { host, port } => run_serve(ServerConfig { host, port }).await?,
    }

    Ok(())
}
