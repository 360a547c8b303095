//! batchci API server.

use batchci_api::{AppState, create_router};
use batchci_backends::{AzureBatchClient, AzureBlobClient, GitHubClient};
use batchci_config::SystemConfig;
use batchci_db::{Store, create_pool, run_migrations};
use batchci_orchestrator::{Collaborators, OrchestratorSettings};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "batchci-server", version, about = "Batch CI orchestration server")]
struct Args {
    /// Path to the KDL configuration file.
    #[arg(long, env = "BATCHCI_CONFIG", default_value = "batchci.kdl")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = SystemConfig::load(&args.config)?;
    info!(path = %args.config.display(), "Loaded configuration");

    info!("Connecting to database...");
    let pool = create_pool(config.database.url.expose(), config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let collaborators = Collaborators {
        compute: Arc::new(AzureBatchClient::new(&config.batch)?),
        storage: Arc::new(AzureBlobClient::new(&config.storage)?),
        source: Arc::new(GitHubClient::new(&config.source)?),
    };
    let state = AppState::new(
        collaborators,
        Store::postgres(pool),
        OrchestratorSettings::from(&config),
        config.operator.token.clone(),
        config.source.branch.clone(),
    );

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(listen = %config.server.listen, "Starting server");
    let listener = TcpListener::bind(&config.server.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
