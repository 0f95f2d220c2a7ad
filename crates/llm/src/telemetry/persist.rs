use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;

use super::metrics::{MetricsService, StatsSnapshot};

/// Minimum interval between snapshot saves.
const MIN_SAVE_INTERVAL: Duration = Duration::from_secs(5);

const REDIS_KEY: &str = "jetgate:stats";

/// Persistence backend for the statistics snapshot.
pub(crate) enum StatsStore {
    File(PathBuf),
    Redis(redis::aio::ConnectionManager),
}

impl StatsStore {
    pub async fn connect(config: &config::StorageConfig) -> anyhow::Result<Self> {
        match config {
            config::StorageConfig::File(path) => Ok(StatsStore::File(path.clone())),
            config::StorageConfig::Redis(url) => {
                let client = redis::Client::open(url.as_str()).context("invalid REDIS_URL")?;
                let manager = client
                    .get_connection_manager()
                    .await
                    .context("failed to connect to Redis")?;

                Ok(StatsStore::Redis(manager))
            }
        }
    }

    pub async fn load(&self) -> anyhow::Result<Option<StatsSnapshot>> {
        let payload = match self {
            StatsStore::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(payload) => Some(payload),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => return Err(e).context("failed to read stats file"),
            },
            StatsStore::Redis(manager) => {
                let mut conn = manager.clone();
                conn.get::<_, Option<String>>(REDIS_KEY)
                    .await
                    .context("failed to load stats from Redis")?
            }
        };

        match payload {
            Some(payload) => {
                let snapshot =
                    serde_json::from_str(&payload).context("persisted stats snapshot is corrupt")?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    pub async fn save(&self, snapshot: &StatsSnapshot) -> anyhow::Result<()> {
        let payload = serde_json::to_string(snapshot).context("failed to serialize stats snapshot")?;

        match self {
            StatsStore::File(path) => tokio::fs::write(path, payload)
                .await
                .context("failed to write stats file"),
            StatsStore::Redis(manager) => {
                let mut conn = manager.clone();
                conn.set::<_, _, ()>(REDIS_KEY, payload)
                    .await
                    .context("failed to save stats to Redis")
            }
        }
    }
}

/// Spawns the debounced persister: at most one save per interval while dirty,
/// plus a final flush on shutdown.
pub(crate) fn spawn_persister(
    metrics: Arc<MetricsService>,
    store: StatsStore,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MIN_SAVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if metrics.take_dirty()
                        && let Err(e) = store.save(&metrics.snapshot()).await
                    {
                        log::warn!("failed to persist stats snapshot: {e:#}");
                    }
                }
            }
        }

        if let Err(e) = store.save(&metrics.snapshot()).await {
            log::warn!("failed to flush stats snapshot on shutdown: {e:#}");
        }
    })
}
