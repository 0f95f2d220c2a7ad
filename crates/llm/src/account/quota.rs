//! Quota snapshots and the fingerprinted TTL cache in front of the probe RPC.

use std::time::Duration;

use mini_moka::sync::Cache;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::provider::jetbrains::JetBrainsProvider;

/// How long a quota probe result stays valid.
pub(crate) const QUOTA_TTL: Duration = Duration::from_secs(60 * 60);

/// Result of one quota probe. The numeric figures are informational; only
/// `has_quota` gates account use.
#[derive(Debug, Clone)]
pub(crate) struct QuotaSnapshot {
    pub has_quota: bool,
    pub used: Option<f64>,
    pub maximum: Option<f64>,
    pub until: Option<String>,
}

impl QuotaSnapshot {
    pub fn exhausted() -> Self {
        Self {
            has_quota: false,
            used: None,
            maximum: None,
            until: None,
        }
    }
}

/// TTL cache collapsing repeated quota probes for the same JWT. A shared
/// refresh lock makes cache misses single-flight: concurrent misses wait for
/// the first probe instead of stampeding upstream.
pub(crate) struct QuotaCache {
    cache: Cache<String, QuotaSnapshot>,
    refresh_lock: futures_util::lock::Mutex<()>,
}

impl QuotaCache {
    pub fn new() -> Self {
        let cache = Cache::builder().max_capacity(1024).time_to_live(QUOTA_TTL).build();

        Self {
            cache,
            refresh_lock: futures_util::lock::Mutex::new(()),
        }
    }

    pub async fn get_or_probe(
        &self,
        provider: &JetBrainsProvider,
        jwt: &SecretString,
    ) -> crate::Result<QuotaSnapshot> {
        let key = fingerprint(jwt);

        if let Some(snapshot) = self.cache.get(&key) {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;

        // Somebody else probed while we were waiting for the lock
        if let Some(snapshot) = self.cache.get(&key) {
            return Ok(snapshot);
        }

        let snapshot = provider.fetch_quota(jwt).await?;
        self.cache.insert(key, snapshot.clone());

        Ok(snapshot)
    }

    /// Records an exhausted outcome observed outside the probe path, e.g. a
    /// 477 from the chat endpoint.
    pub fn mark_exhausted(&self, jwt: &SecretString) {
        self.cache.insert(fingerprint(jwt), QuotaSnapshot::exhausted());
    }
}

fn fingerprint(jwt: &SecretString) -> String {
    let mut hasher = Sha256::new();
    hasher.update(jwt.expose_secret().as_bytes());
    format!("{:x}", hasher.finalize())
}
