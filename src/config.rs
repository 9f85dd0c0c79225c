use std::path::PathBuf;

use rand::RngCore;
use tracing::warn;

use crate::geocode::DEFAULT_ENDPOINT;

pub const DEFAULT_DEVICES_CSV: &str = "loomadevices.csv";

/// Server settings, read from the environment (and `.env` when present).
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub devices_csv: PathBuf,
    pub geocoder_url: String,
    pub admin_username: String,
    pub admin_password_hash: Option<String>,
    pub session_secret: Vec<u8>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let admin_password_hash = dotenvy::var("ADMIN_PASSWORD_HASH")
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        if admin_password_hash.is_none() {
            warn!("ADMIN_PASSWORD_HASH is not set; admin login is disabled");
        }

        let session_secret = match dotenvy::var("SECRET_KEY") {
            Ok(secret) if !secret.is_empty() => secret.into_bytes(),
            _ => {
                warn!("SECRET_KEY is not set; sessions will not survive a restart");
                random_secret()
            }
        };

        Self {
            bind_addr: dotenvy::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            db_path: dotenvy::var("DB_PATH")
                .unwrap_or_else(|_| "loomadb".to_string())
                .into(),
            devices_csv: dotenvy::var("LOOMA_DEVICES_CSV")
                .unwrap_or_else(|_| DEFAULT_DEVICES_CSV.to_string())
                .into(),
            geocoder_url: dotenvy::var("GEOCODER_URL")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            admin_username: dotenvy::var("ADMIN_USERNAME")
                .map(|u| u.trim().to_string())
                .unwrap_or_else(|_| "admin".to_string()),
            admin_password_hash,
            session_secret,
        }
    }
}

pub fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}
