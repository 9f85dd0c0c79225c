use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{debug, error};

pub const SESSION_COOKIE: &str = "looma_session";
const SESSION_TTL_SECS: i64 = 60 * 60 * 24 * 31;

/// HS256 keys for the session cookie.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionClaims {
    #[serde(default)]
    logged_in: bool,
    #[serde(default)]
    flashes: Vec<Flash>,
    exp: usize,
}

/// Browser session carried in a signed cookie.
///
/// A missing, tampered or expired cookie reads as an empty anonymous session.
/// Handlers must hand the session back via [`Session::into_jar`] for changes
/// to reach the browser.
pub struct Session {
    jar: CookieJar,
    keys: SessionKeys,
    claims: SessionClaims,
}

impl Session {
    pub fn from_jar(jar: CookieJar, keys: SessionKeys) -> Self {
        let claims = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| {
                decode::<SessionClaims>(
                    cookie.value(),
                    &keys.decoding,
                    &Validation::new(Algorithm::HS256),
                )
                .map_err(|err| debug!(%err, "discarding invalid session cookie"))
                .ok()
            })
            .map(|data| data.claims)
            .unwrap_or_default();

        Self { jar, keys, claims }
    }

    pub fn is_logged_in(&self) -> bool {
        self.claims.logged_in
    }

    pub fn log_in(&mut self) {
        self.claims.logged_in = true;
    }

    pub fn log_out(&mut self) {
        self.claims.logged_in = false;
    }

    pub fn flash(&mut self, level: FlashLevel, message: impl Into<String>) {
        self.claims.flashes.push(Flash {
            level,
            message: message.into(),
        });
    }

    /// Pending messages, removed from the session once read.
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.claims.flashes)
    }

    pub fn into_jar(mut self) -> CookieJar {
        if !self.claims.logged_in && self.claims.flashes.is_empty() {
            return self.jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
        }

        self.claims.exp = (chrono::Utc::now().timestamp() + SESSION_TTL_SECS) as usize;
        match encode(&Header::default(), &self.claims, &self.keys.encoding) {
            Ok(token) => self.jar.add(
                Cookie::build((SESSION_COOKIE, token))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax),
            ),
            Err(err) => {
                error!(%err, "failed to sign session cookie");
                self.jar
            }
        }
    }
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        Ok(Session::from_jar(jar, SessionKeys::from_ref(state)))
    }
}

/// Session of a logged-in administrator.
///
/// Anonymous requests are rejected with a redirect to `/login` and a warning
/// flash, so protected handlers never run for them.
pub struct AdminSession(pub Session);

impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let mut session = Session::from_request_parts(parts, state)
            .await
            .unwrap_or_else(|never| match never {});

        if session.is_logged_in() {
            return Ok(AdminSession(session));
        }

        debug!(path = %parts.uri.path(), "anonymous request to admin page");
        session.flash(FlashLevel::Warning, "Please log in to access this page.");
        Err((session.into_jar(), Redirect::to("/login")).into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, HeaderValue};

    fn reload(jar: CookieJar, keys: &SessionKeys) -> Session {
        let cookie = jar.get(SESSION_COOKIE).expect("session cookie set");
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={}", cookie.value())).unwrap(),
        );
        Session::from_jar(CookieJar::from_headers(&headers), keys.clone())
    }

    #[test]
    fn login_and_flashes_survive_a_round_trip() {
        let keys = SessionKeys::new(b"test-secret");
        let mut session = Session::from_jar(CookieJar::new(), keys.clone());
        assert!(!session.is_logged_in());

        session.log_in();
        session.flash(FlashLevel::Success, "Logged in successfully.");

        let mut next = reload(session.into_jar(), &keys);
        assert!(next.is_logged_in());
        assert_eq!(
            next.take_flashes(),
            vec![Flash {
                level: FlashLevel::Success,
                message: "Logged in successfully.".into()
            }]
        );
        assert!(next.take_flashes().is_empty());
    }

    #[test]
    fn cookie_signed_with_another_secret_is_ignored() {
        let mut session = Session::from_jar(CookieJar::new(), SessionKeys::new(b"one"));
        session.log_in();
        let jar = session.into_jar();

        let other = SessionKeys::new(b"two");
        assert!(!reload(jar, &other).is_logged_in());
    }

    #[test]
    fn empty_anonymous_session_clears_cookie() {
        let keys = SessionKeys::new(b"test-secret");
        let mut session = Session::from_jar(CookieJar::new(), keys);
        session.log_in();
        session.log_out();
        assert!(session.into_jar().get(SESSION_COOKIE).is_none());
    }
}
