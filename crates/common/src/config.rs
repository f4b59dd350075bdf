//! Configuration management following 12-factor app principles
//!
//! All configuration is loaded from environment variables to ensure
//! clean separation between code and config. Each adapter crate owns its
//! own `*Config::from_env()`; this module holds the process-level settings
//! and the small parsing helpers they share.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Read an environment variable, falling back to `default` when unset.
pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, falling back to `default` when
/// unset or unparseable. Unparseable values are logged.
pub fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparseable environment value");
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Record store connection URL (Supabase PostgreSQL); optional for the mock store
    pub database_url: Option<String>,

    /// Comma-separated CORS origins; permissive when unset
    pub cors_allowed_origins: Option<String>,

    /// Runtime configuration
    pub rust_log: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let config = Self {
            database_url: env::var("DATABASE_URL").ok(),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            rust_log: env_or("RUST_LOG", "proofline=debug"),
            port: env_parse_or("PORT", 3000),
        };

        if config.port == 0 {
            return Err(anyhow::anyhow!("PORT must be a non-zero port number"));
        }

        Ok(config)
    }
}
