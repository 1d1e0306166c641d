//! # Courier Server
//!
//! Accepts messages over HTTP, persists them in batches through the buffered
//! writer, and pushes each persisted message to WebSocket subscribers.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use courier_core::store::PostgresMessageStore;
use courier_server::{
    AppState,
    infra::{
        config::{
            Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions, StoreBackend,
            validation::redact_credentials,
        },
        shutdown::wait_for_shutdown_signal,
        startup::{Services, open_store},
    },
    routes,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "courier-server")]
#[command(
    about = "Buffered message ingestion with batched persistence and WebSocket fan-out"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to a courier.toml configuration file
    #[arg(short, long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// HTTP port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// WebSocket port (overrides config)
    #[arg(long, env = "WS_PORT")]
    ws_port: Option<u16>,

    /// Bind address for both listeners (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Db(DbCommand::Migrate)) = cli.command {
        return run_db_migrate(&cli.serve).await;
    }

    run_server(cli.serve).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } =
        ConfigLoader::with_options(ConfigLoaderOptions {
            config_path: args.config.clone(),
            env_file: args.env_file.clone(),
            server_host: args.host.clone(),
            server_port: args.port,
            ws_port: args.ws_port,
        })
        .load()
        .context("failed to load configuration")?;

    init_tracing();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    Ok(config)
}

async fn run_db_migrate(args: &ServeArgs) -> anyhow::Result<()> {
    let config = load_runtime_config(args)?;
    let url = match config.store.backend() {
        Some(StoreBackend::Postgres(url)) => url,
        Some(StoreBackend::Memory) => {
            info!("memory:// store has no schema to migrate");
            return Ok(());
        }
        None => anyhow::bail!(
            "unsupported store URL {}",
            redact_credentials(&config.store.url)
        ),
    };

    // connect() applies the embedded migrations.
    let store = PostgresMessageStore::connect(&url, 1)
        .await
        .context("database migration failed")?;
    courier_core::store::MessageStore::close(&store).await;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let config = Arc::new(load_runtime_config(&args)?);

    let http_addr = config
        .server
        .http_addr()
        .with_context(|| format!("invalid SERVER_HOST '{}'", config.server.host))?;
    let ws_addr = config
        .server
        .ws_addr()
        .with_context(|| format!("invalid SERVER_HOST '{}'", config.server.host))?;

    let store = open_store(&config).await?;
    let services = Services::start(&config, store).await?;
    let state = AppState::new(
        Arc::clone(&config),
        services.writer.clone(),
        services.broadcaster.clone(),
    );

    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {http_addr}"))?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {ws_addr}"))?;

    let ws_router = routes::create_ws_router(state.clone());
    let ws_shutdown = services.broadcaster.shutdown_token();
    let ws_server = tokio::spawn(async move {
        axum::serve(ws_listener, ws_router)
            .with_graceful_shutdown(ws_shutdown.cancelled_owned())
            .await
    });
    info!(%ws_addr, "WebSocket server listening");

    let http_router = routes::create_api_router(state);
    info!(%http_addr, "HTTP server listening");
    let served = axum::serve(http_listener, http_router)
        .with_graceful_shutdown(async {
            if let Err(err) = wait_for_shutdown_signal().await {
                error!(error = %err, "failed to install signal handlers");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received; no longer accepting requests");
        })
        .await;

    let shutdown = services.shutdown().await;

    match ws_server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "WebSocket server failed"),
        Err(err) => error!(error = %err, "WebSocket server task panicked"),
    }

    served.context("HTTP server failed")?;
    shutdown?;
    info!("shutdown complete");
    Ok(())
}
