use std::path::PathBuf;

use anyhow::Context;

/// Runtime configuration, read once at startup from the environment
/// (with `.env` support).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Missing .env file is fine; real env vars still apply.
        let _ = dotenv::dotenv();

        Ok(Self {
            database_url: dotenv::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            bind_addr: dotenv::var("BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret: dotenv::var("JWT_SECRET")
                .context("JWT_SECRET must be set")?,
            upload_dir: dotenv::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "uploads".to_string())
                .into(),
        })
    }
}
