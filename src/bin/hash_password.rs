//! Operator helper for the admin login.
//!
//! `hash_password <password>` prints an argon2 hash for `ADMIN_PASSWORD_HASH`.
//! `hash_password --check <username> <password>` tests a login against the
//! configured environment without starting the server.

use anyhow::{bail, Result};
use looma_scan::{
    auth::{utils::hash_password, AdminCredentials},
    config::AppConfig,
};
use std::env;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    looma_scan::init_tracing();

    let args = env::args().skip(1).collect::<Vec<_>>();
    match args.as_slice() {
        [flag, username, password] if flag == "--check" => {
            let config = AppConfig::from_env();
            let admin = AdminCredentials::new(
                config.admin_username.clone(),
                config.admin_password_hash.clone(),
            );
            println!("Username match: {}", username.trim() == admin.username);
            println!("Login accepted: {}", admin.verify(username.trim(), password));
        }
        [password] => {
            println!("{}", hash_password(password)?);
        }
        _ => bail!("usage: hash_password <password> | hash_password --check <username> <password>"),
    }

    Ok(())
}
