use std::env;

use anyhow::{Context, bail};
use secrecy::SecretString;

use crate::{
    AccountConfig, Config, LicenseCredentials, LoadOptions, ServerConfig, StorageConfig,
    models::ModelRegistry,
};

const DEFAULT_PORT: u16 = 7860;

pub(crate) fn load(options: LoadOptions) -> anyhow::Result<Config> {
    let port = match options.port {
        Some(port) => port,
        None => match env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {raw:?}"))?,
            Err(_) => DEFAULT_PORT,
        },
    };

    let client_keys = comma_list(&env::var("CLIENT_API_KEYS").unwrap_or_default())
        .into_iter()
        .map(SecretString::from)
        .collect();

    let accounts = load_accounts()?;

    let storage = match env::var("REDIS_URL") {
        Ok(url) if !url.trim().is_empty() => StorageConfig::Redis(url.trim().to_string()),
        _ => StorageConfig::File(options.stats_path),
    };

    let models = ModelRegistry::load(&options.models_path)?;

    let config = Config {
        server: ServerConfig { port },
        client_keys,
        accounts,
        storage,
        models,
    };

    config.validate()?;

    Ok(config)
}

/// Builds the account list from `JETBRAINS_LICENSE_IDS` / `JETBRAINS_AUTHORIZATIONS`
/// (parallel comma-separated lists) plus any static JWTs in `JETBRAINS_JWTS`.
fn load_accounts() -> anyhow::Result<Vec<AccountConfig>> {
    let license_ids = comma_list(&env::var("JETBRAINS_LICENSE_IDS").unwrap_or_default());
    let authorizations = comma_list(&env::var("JETBRAINS_AUTHORIZATIONS").unwrap_or_default());

    if license_ids.len() != authorizations.len() {
        bail!(
            "JETBRAINS_LICENSE_IDS and JETBRAINS_AUTHORIZATIONS must be parallel lists, got {} and {} entries",
            license_ids.len(),
            authorizations.len()
        );
    }

    let mut accounts = Vec::with_capacity(license_ids.len());

    for (license_id, authorization) in license_ids.into_iter().zip(authorizations) {
        accounts.push(AccountConfig {
            key: license_id.clone(),
            credentials: Some(LicenseCredentials {
                license_id,
                authorization: SecretString::from(authorization),
            }),
            static_jwt: None,
        });
    }

    for (n, jwt) in comma_list(&env::var("JETBRAINS_JWTS").unwrap_or_default())
        .into_iter()
        .enumerate()
    {
        accounts.push(AccountConfig {
            key: format!("static-{}", n + 1),
            credentials: None,
            static_jwt: Some(SecretString::from(jwt)),
        });
    }

    Ok(accounts)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.client_keys.is_empty() {
        bail!(
            "no client API keys configured; set CLIENT_API_KEYS to a comma-separated list of accepted keys"
        );
    }

    if config.accounts.is_empty() {
        bail!(
            "no upstream accounts configured; set JETBRAINS_LICENSE_IDS + JETBRAINS_AUTHORIZATIONS or JETBRAINS_JWTS"
        );
    }

    if config.models.is_empty() {
        bail!("no models configured; models.json must list at least one model");
    }

    Ok(())
}

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
