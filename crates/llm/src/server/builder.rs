//! Wires the dispatcher from configuration: accounts, pool, caches, metrics.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    account::{Account, pool::AccountPool, quota::QuotaCache},
    provider::jetbrains::JetBrainsProvider,
    server::{LlmServer, LlmServerInner},
    telemetry::{
        metrics::MetricsService,
        persist::{StatsStore, spawn_persister},
    },
    translate::TranslatorPool,
};

pub(crate) struct LlmServerBuilder<'a> {
    config: &'a config::Config,
    shutdown: CancellationToken,
}

impl<'a> LlmServerBuilder<'a> {
    pub fn new(config: &'a config::Config, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    pub async fn build(self) -> anyhow::Result<LlmServer> {
        self.config.validate()?;

        log::debug!(
            "initializing gateway with {} accounts and {} models",
            self.config.accounts.len(),
            self.config.models.iter().count()
        );

        let metrics = Arc::new(MetricsService::new());

        let store = StatsStore::connect(&self.config.storage).await?;
        match store.load().await {
            Ok(Some(snapshot)) => {
                log::info!("restored statistics snapshot ({} requests recorded)", snapshot.total);
                metrics.restore(snapshot);
            }
            Ok(None) => {}
            Err(e) => log::warn!("ignoring unreadable statistics snapshot: {e:#}"),
        }

        spawn_persister(metrics.clone(), store, self.shutdown);

        let provider = Arc::new(JetBrainsProvider::new());
        let quota = Arc::new(QuotaCache::new());

        let accounts = self
            .config
            .accounts
            .iter()
            .map(|account| Arc::new(Account::from_config(account)))
            .collect();

        let pool = AccountPool::new(accounts, provider.clone(), quota.clone(), metrics.clone());

        Ok(LlmServer::from_inner(LlmServerInner {
            pool,
            provider,
            quota,
            models: self.config.models.clone(),
            translators: TranslatorPool::new(),
            metrics,
            client_keys: self.config.client_keys.clone(),
        }))
    }
}
