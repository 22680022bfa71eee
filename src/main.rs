// ABOUTME: Server binary: configuration, resource wiring, scheduler, graceful shutdown
// ABOUTME: All request handling lives in the library's routes/services modules
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use mnemograph::{
    config::ServerConfig,
    database::Database,
    llm::{OpenAiCompatibleConfig, OpenAiCompatibleProvider},
    resources::ServerResources,
    routes,
    vector::VectorIndex,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "mnemograph=info,tower_http=warn");
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();

    let database = Database::connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("database setup failed: {e}"))?;

    let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig::from(&config.llm))
        .map_err(|e| anyhow::anyhow!("LLM provider setup failed: {e}"))?;

    let vector = match &config.vector {
        Some(vector_config) => match VectorIndex::new(vector_config) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!("vector index unavailable, running graph-only: {e}");
                None
            }
        },
        None => None,
    };

    let resources = Arc::new(ServerResources::new(
        config.clone(),
        database,
        Arc::new(provider),
        vector,
    ));

    if config.scheduler_interval_secs > 0 {
        start_processor_scheduler(Arc::clone(&resources), config.scheduler_interval_secs);
    }

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin.parse()?))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    let app = routes::build_router(Arc::clone(&resources)).layer(
        ServiceBuilder::new()
            .layer(tower::limit::ConcurrencyLimitLayer::new(
                config.max_concurrent_requests,
            ))
            .layer(cors),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

/// Background tick standing in for an external cron: runs the processor on a
/// fixed interval. The run itself is single-flight, so overlapping triggers
/// from the HTTP endpoint cannot double-process.
fn start_processor_scheduler(resources: Arc<ServerResources>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // Skip the immediate first tick.
        interval.tick().await;

        loop {
            interval.tick().await;
            match resources.processor.run().await {
                Ok(summary) if summary.processed > 0 => {
                    info!(
                        processed = summary.processed,
                        useful = summary.useful,
                        "scheduled processor run complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("scheduled processor run failed: {e}"),
            }
        }
    });

    info!("processor scheduler started (interval: {interval_secs}s)");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}
