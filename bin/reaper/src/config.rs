//! Reaper configuration.
//!
//! Loaded from environment variables via the `config` crate; nested keys use
//! `__` as separator (`STORE__DATABASE_URL`, `HOOKS__BASE_URL`).

use conduit_hook_client::HookClientConfig;
use conduit_store::StoreConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ReaperConfig {
    pub store: StoreConfig,

    pub hooks: HookClientConfig,

    /// Interval between purge runs, in seconds.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    300
}

impl ReaperConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
