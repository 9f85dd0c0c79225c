use crate::web::AppState;
use axum::{routing::get, Router};

pub mod handlers;
pub mod session;
pub mod utils;

pub use session::{AdminSession, Flash, FlashLevel, Session, SessionKeys};
pub use utils::AdminCredentials;

use handlers::{login_handler, login_page, logout_handler};

/// Admin login/logout routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login_handler))
        .route("/logout", get(logout_handler))
}
