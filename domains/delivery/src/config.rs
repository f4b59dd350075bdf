//! Delivery settings loaded from the environment

use std::time::Duration;

use proofline_common::{env_or, env_parse_or};

/// Default production subfolder name inside each delivered folder
pub const DEFAULT_PRODUCTION_SUBFOLDER: &str = "Production Assets";

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// Seconds between scheduled scans
    pub scan_interval_secs: u64,
    /// Maximum assets examined per scan
    pub scan_max_items: usize,
    /// Concurrent deliveries per scan and per function
    pub concurrency: usize,
    /// Retries after the first attempt on transient failure
    pub max_retries: u32,
    /// Initial retry backoff
    pub retry_backoff_ms: u64,
    /// Shared production bundle copied into every delivered folder
    pub production_bundle_ref: Option<String>,
    pub production_subfolder: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 120,
            scan_max_items: 50,
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 1_000,
            production_bundle_ref: None,
            production_subfolder: DEFAULT_PRODUCTION_SUBFOLDER.to_string(),
        }
    }
}

impl DeliveryConfig {
    /// Load delivery settings from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scan_interval_secs: env_parse_or("SCAN_INTERVAL_SECS", defaults.scan_interval_secs)
                .max(1),
            scan_max_items: env_parse_or("SCAN_MAX_ITEMS", defaults.scan_max_items).max(1),
            concurrency: env_parse_or("DELIVERY_CONCURRENCY", defaults.concurrency).max(1),
            max_retries: env_parse_or("DELIVERY_MAX_RETRIES", defaults.max_retries),
            retry_backoff_ms: env_parse_or("DELIVERY_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            production_bundle_ref: std::env::var("PRODUCTION_BUNDLE_REF")
                .ok()
                .filter(|r| !r.trim().is_empty()),
            production_subfolder: env_or("PRODUCTION_SUBFOLDER", DEFAULT_PRODUCTION_SUBFOLDER),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
