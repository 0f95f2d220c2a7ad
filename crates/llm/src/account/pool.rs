//! Bounded FIFO pool leasing accounts to in-flight requests.
//!
//! The pool is a buffered channel of account pointers with capacity equal to
//! the account count; every account is enqueued exactly once at startup.
//! Acquisition takes the next pointer, readies it (JWT refresh, quota check)
//! under the account's own lock, and hands out a lease. Release is a single
//! non-blocking enqueue performed by the lease's drop, so an account returns
//! to the pool on every path, including cancellation.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use tokio::sync::{Mutex, mpsc};

use crate::{
    account::{Account, quota, quota::QuotaCache, token},
    error::{AcquireError, LlmError},
    provider::jetbrains::JetBrainsProvider,
    telemetry::metrics::MetricsService,
};

/// Default wait budget for one acquisition.
pub(crate) const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Waits above this threshold are recorded as pool-wait metrics.
const SLOW_ACQUIRE_THRESHOLD: Duration = Duration::from_millis(100);

pub(crate) struct AccountPool {
    accounts: Vec<Arc<Account>>,
    tx: mpsc::Sender<Arc<Account>>,
    rx: Mutex<mpsc::Receiver<Arc<Account>>>,
    provider: Arc<JetBrainsProvider>,
    quota: Arc<QuotaCache>,
    metrics: Arc<MetricsService>,
}

impl AccountPool {
    pub fn new(
        accounts: Vec<Arc<Account>>,
        provider: Arc<JetBrainsProvider>,
        quota: Arc<QuotaCache>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(accounts.len().max(1));

        for account in &accounts {
            // Cannot fail: capacity equals the account count.
            let _ = tx.try_send(account.clone());
        }

        Self {
            accounts,
            tx,
            rx: Mutex::new(rx),
            provider,
            quota,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Leases a ready account with the default wait budget.
    pub async fn acquire(&self) -> Result<AccountLease, AcquireError> {
        self.acquire_with_budget(ACQUIRE_TIMEOUT).await
    }

    /// Leases a ready account. Accounts that fail readiness are marked tried,
    /// returned to the queue, and the next one is taken; gives up after 2·N
    /// attempts or once every account has been tried.
    pub async fn acquire_with_budget(&self, budget: Duration) -> Result<AccountLease, AcquireError> {
        let started = Instant::now();
        let max_attempts = self.accounts.len() * 2;

        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts = 0;

        let result = loop {
            if attempts >= max_attempts || tried.len() >= self.accounts.len() {
                break Err(AcquireError::AllExhausted);
            }
            attempts += 1;

            let Some(remaining) = budget.checked_sub(started.elapsed()) else {
                break Err(AcquireError::Timeout);
            };

            let received = tokio::time::timeout(remaining, async {
                let mut rx = self.rx.lock().await;
                rx.recv().await
            })
            .await;

            let lease = match received {
                Err(_) => break Err(AcquireError::Timeout),
                // The channel only closes when the pool is torn down.
                Ok(None) => break Err(AcquireError::Cancelled),
                Ok(Some(account)) => AccountLease::new(account, self.tx.clone()),
            };

            if tried.contains(lease.account().key()) {
                // Already failed in this acquisition; put it back and keep looking.
                drop(lease);
                continue;
            }

            match self.prepare(lease.account()).await {
                Ok(()) => break Ok(lease),
                Err(e) => {
                    log::debug!("account {} not usable: {e}", lease.account().key());
                    tried.insert(lease.account().key().to_string());
                    drop(lease);
                }
            }
        };

        let waited = started.elapsed();
        if waited > SLOW_ACQUIRE_THRESHOLD {
            self.metrics.record_pool_wait(waited);
        }
        if result.is_err() {
            self.metrics.record_pool_error();
        }

        result
    }

    /// Readies an account under its own lock: refreshes the JWT when stale
    /// and re-verifies quota when the cached check has aged out.
    async fn prepare(&self, account: &Account) -> crate::Result<()> {
        let mut state = account.lock_state().await;
        let now = SystemTime::now();

        match account.credentials() {
            Some(credentials) => {
                if state.needs_refresh(now) {
                    token::refresh_locked(&self.provider, credentials, &mut state, false).await?;
                }
            }
            None => {
                if state.is_expired(now) {
                    // Static JWTs cannot be refreshed; once expired the
                    // account is out for good.
                    state.has_quota = false;
                    return Err(LlmError::UpstreamAuth(format!(
                        "static JWT for account {} has expired",
                        account.key()
                    )));
                }
            }
        }

        let stale = state
            .last_quota_check
            .is_none_or(|checked| checked.elapsed() >= quota::QUOTA_TTL);

        if stale {
            let jwt = state
                .jwt
                .clone()
                .ok_or_else(|| LlmError::InternalError(Some(format!("account {} has no JWT", account.key()))))?;

            let snapshot = self.quota.get_or_probe(&self.provider, &jwt).await?;

            log::debug!(
                "quota probe for account {}: used={:?} maximum={:?} until={:?}",
                account.key(),
                snapshot.used,
                snapshot.maximum,
                snapshot.until
            );

            state.has_quota = snapshot.has_quota;
            state.last_quota_check = Some(Instant::now());
        }

        if !state.has_quota {
            return Err(LlmError::UpstreamQuota(format!(
                "account {} is out of quota",
                account.key()
            )));
        }

        Ok(())
    }
}

/// A checked-out account. Dropping the lease returns the account to the pool
/// with a single non-blocking enqueue.
#[derive(Debug)]
pub(crate) struct AccountLease {
    account: Option<Arc<Account>>,
    tx: mpsc::Sender<Arc<Account>>,
}

impl AccountLease {
    fn new(account: Arc<Account>, tx: mpsc::Sender<Arc<Account>>) -> Self {
        Self {
            account: Some(account),
            tx,
        }
    }

    pub fn account(&self) -> &Arc<Account> {
        self.account.as_ref().expect("account taken before drop")
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        if let Some(account) = self.account.take()
            && self.tx.try_send(account).is_err()
        {
            // Capacity equals the account count, so a full channel means an
            // account was enqueued twice somewhere.
            log::warn!("account pool full on release; dropping entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(accounts: Vec<Account>) -> AccountPool {
        AccountPool::new(
            accounts.into_iter().map(Arc::new).collect(),
            Arc::new(JetBrainsProvider::new()),
            Arc::new(QuotaCache::new()),
            Arc::new(MetricsService::new()),
        )
    }

    #[tokio::test]
    async fn leases_rotate_fifo() {
        let pool = pool_of(vec![
            Account::for_tests("a", "jwt-a", true),
            Account::for_tests("b", "jwt-b", true),
        ]);

        let first = pool.acquire().await.unwrap();
        assert_eq!(first.account().key(), "a");

        let second = pool.acquire().await.unwrap();
        assert_eq!(second.account().key(), "b");

        drop(first);
        let third = pool.acquire().await.unwrap();
        assert_eq!(third.account().key(), "a");
    }

    #[tokio::test]
    async fn lease_count_is_conserved() {
        let pool = pool_of(vec![
            Account::for_tests("a", "jwt-a", true),
            Account::for_tests("b", "jwt-b", true),
        ]);

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();

        drop(first);
        drop(second);

        // Both accounts are back; two more acquisitions succeed.
        let _third = pool.acquire().await.unwrap();
        let _fourth = pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_accounts_end_in_all_exhausted() {
        let pool = pool_of(vec![
            Account::for_tests("a", "jwt-a", false),
            Account::for_tests("b", "jwt-b", false),
        ]);

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err, AcquireError::AllExhausted);

        // Failed readiness returns accounts to the queue.
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err, AcquireError::AllExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_times_out() {
        let pool = pool_of(vec![Account::for_tests("a", "jwt-a", true)]);

        let lease = pool.acquire().await.unwrap();

        let err = pool
            .acquire_with_budget(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, AcquireError::Timeout);

        drop(lease);
    }

    #[tokio::test]
    async fn static_account_without_jwt_is_unusable() {
        let config = config::AccountConfig {
            key: "static-1".to_string(),
            credentials: None,
            static_jwt: None,
        };

        let pool = pool_of(vec![Account::from_config(&config)]);

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err, AcquireError::AllExhausted);
    }
}
