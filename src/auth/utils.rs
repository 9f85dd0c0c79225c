use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::warn;

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string();
    Ok(hash)
}

pub fn verify_password(hash: &str, password: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// The single configured administrator.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password_hash: Option<String>,
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password_hash: Option<String>) -> Self {
        Self {
            username: username.into(),
            password_hash,
        }
    }

    /// Fails closed: no configured hash, or an unparsable one, never matches.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let Some(hash) = self.password_hash.as_deref() else {
            return false;
        };
        if username != self.username {
            return false;
        }
        verify_password(hash, password).unwrap_or_else(|err| {
            warn!(%err, "configured admin password hash is malformed");
            false
        })
    }
}
