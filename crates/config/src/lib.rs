//! Jetgate configuration assembled from environment variables and `models.json`.

#![deny(missing_docs)]

mod loader;
mod models;

use std::path::PathBuf;

use secrecy::SecretString;

pub use models::{ModelDescriptor, ModelRegistry};

/// Main configuration structure for the Jetgate gateway.
#[derive(Debug)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Client API keys accepted on the public endpoints.
    pub client_keys: Vec<SecretString>,
    /// Upstream credential units backing the account pool.
    pub accounts: Vec<AccountConfig>,
    /// Where aggregate statistics are persisted.
    pub storage: StorageConfig,
    /// Models exposed on the public surface, loaded from `models.json`.
    pub models: ModelRegistry,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the gateway listens on. Defaults to 7860.
    pub port: u16,
}

/// One upstream credential unit.
#[derive(Debug)]
pub struct AccountConfig {
    /// Stable identifier: the license id, or `static-<n>` for static JWTs.
    pub key: String,
    /// License-based credentials, when the account can mint its own JWTs.
    pub credentials: Option<LicenseCredentials>,
    /// Pre-issued JWT for accounts without license credentials.
    pub static_jwt: Option<SecretString>,
}

/// License id plus the static authorization credential used to mint JWTs.
#[derive(Debug)]
pub struct LicenseCredentials {
    /// The JetBrains license identifier.
    pub license_id: String,
    /// The static authorization credential presented to the JWT endpoint.
    pub authorization: SecretString,
}

/// Statistics persistence backend selection.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Persist the snapshot to a JSON file.
    File(
        /// Path of the snapshot file.
        PathBuf,
    ),
    /// Persist the snapshot to Redis under a fixed key.
    Redis(
        /// Redis connection URL.
        String,
    ),
}

/// Filesystem and environment inputs for [`Config::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Path of the models registry file.
    pub models_path: PathBuf,
    /// Path of the statistics snapshot file (ignored when `REDIS_URL` is set).
    pub stats_path: PathBuf,
    /// Listen port override; falls back to the `PORT` variable, then 7860.
    pub port: Option<u16>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            models_path: PathBuf::from("models.json"),
            stats_path: PathBuf::from("stats.json"),
            port: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment and the models file.
    pub fn load(options: LoadOptions) -> anyhow::Result<Config> {
        loader::load(options)
    }

    /// Validates that the configuration can actually serve requests.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}
