pub mod auth;
pub mod config;
pub mod db;
pub mod directory;
pub mod geocode;
pub mod labels;
pub mod model;
pub mod web;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Shared subscriber setup for every binary; `RUST_LOG` overrides the default.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
