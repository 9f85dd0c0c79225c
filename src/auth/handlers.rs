use axum::{
    extract::{Form, State},
    response::{IntoResponse, Redirect, Response},
};
use minijinja::context;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    auth::session::{FlashLevel, Session},
    web::AppState,
};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login_page(State(state): State<AppState>, mut session: Session) -> Response {
    let page = state.templates.page(
        "login.html",
        context! { flashes => session.take_flashes() },
    );
    (session.into_jar(), page).into_response()
}

pub async fn login_handler(
    State(state): State<AppState>,
    mut session: Session,
    Form(req): Form<LoginForm>,
) -> Response {
    let username = req.username.trim();

    if state.admin.verify(username, &req.password) {
        info!(username, "admin logged in");
        session.log_in();
        session.flash(FlashLevel::Success, "Logged in successfully.");
        return (session.into_jar(), Redirect::to("/dashboard")).into_response();
    }

    // Same message for unknown user and wrong password.
    warn!(username, "rejected admin login");
    session.flash(FlashLevel::Error, "Invalid credentials.");
    login_page(State(state), session).await
}

pub async fn logout_handler(mut session: Session) -> Response {
    session.log_out();
    session.flash(FlashLevel::Info, "Logged out successfully.");
    (session.into_jar(), Redirect::to("/login")).into_response()
}
