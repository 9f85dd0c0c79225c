use std::sync::Arc;

use anyhow::Context;
use axum::{extract::FromRef, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::{
    auth::{self, AdminCredentials, SessionKeys},
    config::AppConfig,
    db::DBLayer,
    directory::DeviceDirectory,
    geocode::Geocoder,
};

pub mod handlers;
pub mod templates;

pub use templates::Templates;

use handlers::{dashboard, device, index, looma_map, script, submit};

// ------------------------------------------------------------
// STATE
// ------------------------------------------------------------
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DBLayer>,
    pub devices: DeviceDirectory,
    pub geocoder: Geocoder,
    pub templates: Arc<Templates>,
    pub admin: Arc<AdminCredentials>,
    pub session_keys: SessionKeys,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let db = DBLayer::new(&config.db_path)?;
        let geocoder = Geocoder::new(config.geocoder_url.clone())
            .context("Failed to build geocoder client")?;
        let templates = Templates::new().context("Failed to compile page templates")?;

        Ok(Self {
            db: Arc::new(db),
            devices: DeviceDirectory::new(config.devices_csv.clone()),
            geocoder,
            templates: Arc::new(templates),
            admin: Arc::new(AdminCredentials::new(
                config.admin_username.clone(),
                config.admin_password_hash.clone(),
            )),
            session_keys: SessionKeys::new(&config.session_secret),
        })
    }
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        state.session_keys.clone()
    }
}

// ------------------------------------------------------------
// ROUTES
// ------------------------------------------------------------
pub fn router(state: AppState) -> Router {
    Router::new()
        // Public scan form
        .route("/", get(index).post(submit))
        .route("/static/script.js", get(script))
        .merge(auth::router())
        // Admin only (guarded by the AdminSession extractor)
        .route("/dashboard", get(dashboard))
        .route("/device/{serial}", get(device))
        .route("/looma_map", get(looma_map))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
