use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use looma_scan::{config::AppConfig, web};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // -----------------------------
    // Logging
    // -----------------------------
    looma_scan::init_tracing();

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let config = AppConfig::from_env();
    let state = web::AppState::from_config(&config)?;

    info!(
        db = %config.db_path.display(),
        devices = %config.devices_csv.display(),
        admin = %config.admin_username,
        "starting Looma scan server"
    );

    // -----------------------------
    // Routers
    // -----------------------------
    let app = web::router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    info!("🌐 HTTP listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
