pub mod api;
pub mod db;
pub mod error;
mod migrations;
pub mod projector;
pub mod reconcile;
pub mod services;
pub mod state;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use state::AppState;

/// Start the identify service and block until shutdown.
pub fn run() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = state::load_config()?;
    let db_path = state::resolve_db_path(&config).map_err(|e| e.to_string())?;

    // Migrate once up front; request connections skip the schema check
    {
        let db = db::ContactDb::open_at(db_path.clone(), Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| format!("Failed to open contacts database: {e}"))?;
        let primaries = db.count_primaries().map_err(|e| e.to_string())?;
        log::info!(
            "Contacts database ready at {} ({} identities)",
            db_path.display(),
            primaries
        );
    }

    let state = Arc::new(AppState::new(&config, db_path));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {e}"))?;

    runtime.block_on(serve(config, state))
}

async fn serve(config: types::Config, state: Arc<AppState>) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {e}", config.bind_addr))?;
    log::info!("contactlink listening on http://{}", config.bind_addr);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("Server error: {e}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}
