use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;

const SECRET_KEY_BYTES: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub secret_key: String,
    pub database_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secret_key = resolve_secret_key(std::env::var("SECRET_KEY").ok());
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://microblog.db?mode=rwc".into());
        Ok(Self {
            secret_key,
            database_url,
        })
    }
}

/// `SECRET_KEY` from the environment wins; otherwise a fresh random key
/// is generated for this process only, so anything signed with it stops
/// verifying after a restart.
pub(crate) fn resolve_secret_key(env_value: Option<String>) -> String {
    match env_value.filter(|v| !v.is_empty()) {
        Some(value) => value,
        None => {
            let mut bytes = [0u8; SECRET_KEY_BYTES];
            OsRng.fill_bytes(&mut bytes);
            tracing::warn!("SECRET_KEY is not set; generated a key valid for this process only");
            hex::encode(bytes)
        }
    }
}
