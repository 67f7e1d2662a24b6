use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::pool::AccountPool;
use crate::proxy::routes::build_router;
use crate::proxy::state::AppState;
use crate::proxy::upstream::UpstreamClient;

// Builds the shared state, binds the listener, serves until ctrl-c, then
// tears down: writer flushed, caches emptied.
pub async fn run(config: Config) -> AppResult<()> {
    std::fs::create_dir_all(&config.data_dir)?;

    let pool = Arc::new(AccountPool::new(
        config.accounts_path(),
        config.default_project_id.clone(),
    )?);
    let writer = pool.spawn_writer();
    let upstream = Arc::new(UpstreamClient::new()?);
    let state = AppState::new(pool.clone(), upstream, Arc::new(config.clone()));

    let app = build_router(state);
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Config(format!("failed to bind {}: {}", bind_addr, e)))?;
    info!("Gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(format!("server error: {}", e)))?;

    info!("Shutting down");
    pool.shutdown();
    let _ = writer.await;
    crate::proxy::signature_cache::SignatureCache::global().clear();
    crate::proxy::tool_names::ToolNameCache::global().clear();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal");
}
