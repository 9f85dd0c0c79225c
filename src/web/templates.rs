use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use minijinja::Environment;
use serde::Serialize;
use tracing::error;

macro_rules! page_template {
    ($name:literal) => {
        (
            $name,
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/", $name)),
        )
    };
}

const PAGES: &[(&str, &str)] = &[
    page_template!("base.html"),
    page_template!("index.html"),
    page_template!("login.html"),
    page_template!("dashboard.html"),
    page_template!("device.html"),
    page_template!("map.html"),
];

/// Compiled page templates, shared by every handler.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        for (name, source) in PAGES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    pub fn render(&self, name: &str, ctx: impl Serialize) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(ctx)
    }

    pub fn page(&self, name: &str, ctx: impl Serialize) -> Response {
        match self.render(name, ctx) {
            Ok(html) => Html(html).into_response(),
            Err(err) => {
                error!(template = name, %err, "page rendering failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "page rendering failed").into_response()
            }
        }
    }
}
