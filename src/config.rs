// ⚙️ Configuration - environment with defaults
//
// PARKING_DB_PATH               database file        (default: parking.db)
// PARKING_BIND_ADDR             server listen addr   (default: 127.0.0.1:3000)
// PARKING_BILLING_TIMEOUT_SECS  billing run deadline (default: none)
//
// CLI flags override these values (see main.rs).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "PARKING_DB_PATH";
pub const ENV_BIND_ADDR: &str = "PARKING_BIND_ADDR";
pub const ENV_BILLING_TIMEOUT: &str = "PARKING_BILLING_TIMEOUT_SECS";

pub const DEFAULT_DB_PATH: &str = "parking.db";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub billing_timeout: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from(DEFAULT_DB_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            billing_timeout: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = AppConfig::default();

        if let Some(path) = get(ENV_DB_PATH) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(addr) = get(ENV_BIND_ADDR) {
            config.bind_addr = addr.trim().to_string();
        }
        if let Some(secs) = get(ENV_BILLING_TIMEOUT) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("{ENV_BILLING_TIMEOUT} must be a whole number of seconds, got '{secs}'"))?;
            config.billing_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}
