use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use deeptracy::config::ServiceConfig;
use deeptracy::server::{AppState, create_router};
use deeptracy::store::{SqliteStore, Store};

#[derive(Parser)]
#[command(name = "deeptracy")]
#[command(about = "Dependency analysis tracking server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// TOML configuration file
    #[arg(long, env = "DEEPTRACY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file. Without one the catalog lives in memory.
    #[arg(long, env = "DEEPTRACY_DATABASE")]
    database: Option<PathBuf>,
}

impl StoreArgs {
    fn load(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::load(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        if let Some(database) = &self.database {
            config.database = Some(database.clone());
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        #[command(flatten)]
        store: StoreArgs,

        /// Host to bind to
        #[arg(long, env = "DEEPTRACY_HOST")]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short, env = "DEEPTRACY_PORT")]
        port: Option<u16>,
    },

    /// Apply pending schema migrations and exit
    Migrate {
        #[command(flatten)]
        store: StoreArgs,
    },
}

/// Opens the catalog, waiting for the database to become reachable.
async fn open_store(config: &ServiceConfig) -> anyhow::Result<SqliteStore> {
    let mut attempt = 0;
    loop {
        match SqliteStore::open(config.database.as_deref()).and_then(|store| {
            store.initialize()?;
            Ok(store)
        }) {
            Ok(store) => return Ok(store),
            Err(e) if attempt < config.startup_retries => {
                attempt += 1;
                warn!("Waiting for database ({e}), attempt {attempt}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e).context("opening database"),
        }
    }
}

fn init_tracing(config: &ServiceConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate { store } => {
            let config = store.load()?;
            init_tracing(&config);

            let store = open_store(&config).await?;
            info!("Schema at version {}", store.schema_version()?);
        }
        Commands::Serve { store, host, port } => {
            let mut config = store.load()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            init_tracing(&config);

            match &config.database {
                Some(path) => info!("Using database {}", path.display()),
                None => warn!("No database configured, catalog is in memory"),
            }

            let store = open_store(&config).await?;
            let state = Arc::new(AppState::new(Arc::new(store)));

            let app = create_router(state);
            let addr = config.socket_addr()?;

            info!("Starting server on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
