//! Upstream credential units and the pool leasing them to requests.

pub(crate) mod pool;
pub(crate) mod quota;
pub(crate) mod token;

use std::time::{Duration, Instant, SystemTime};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, MutexGuard};

use crate::{error::LlmError, provider::jetbrains::JetBrainsProvider};

/// JWTs within this window of their expiry are refreshed before use.
pub(crate) const REFRESH_AHEAD: Duration = Duration::from_secs(12 * 60 * 60);

/// One upstream credential unit: a license that can mint JWTs, or a static
/// pre-issued JWT. Mutable token/quota state sits behind a per-account lock;
/// only pointers to accounts circulate through the pool channel.
#[derive(Debug)]
pub(crate) struct Account {
    key: String,
    credentials: Option<Credentials>,
    state: Mutex<AccountState>,
}

/// License id plus the static authorization credential used to mint JWTs.
#[derive(Debug)]
pub(crate) struct Credentials {
    pub license_id: String,
    pub authorization: SecretString,
}

/// Mutable per-account state, guarded by the account's lock.
#[derive(Debug)]
pub(crate) struct AccountState {
    pub jwt: Option<SecretString>,
    pub expires_at: Option<SystemTime>,
    pub has_quota: bool,
    pub last_quota_check: Option<Instant>,
    pub last_updated: Option<SystemTime>,
}

impl AccountState {
    /// Whether the JWT must be (re)minted before use. Static JWTs without a
    /// parseable expiry are used as-is.
    pub fn needs_refresh(&self, now: SystemTime) -> bool {
        match (&self.jwt, self.expires_at) {
            (None, _) => true,
            (Some(_), Some(expires_at)) => now + REFRESH_AHEAD >= expires_at,
            (Some(_), None) => false,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

impl Account {
    pub fn from_config(config: &config::AccountConfig) -> Self {
        let credentials = config.credentials.as_ref().map(|credentials| Credentials {
            license_id: credentials.license_id.clone(),
            authorization: credentials.authorization.clone(),
        });

        let jwt = config.static_jwt.clone();
        let expires_at = jwt
            .as_ref()
            .and_then(|jwt| token::parse_expiry(jwt.expose_secret()).ok());

        Self {
            key: config.key.clone(),
            credentials,
            state: Mutex::new(AccountState {
                jwt,
                expires_at,
                has_quota: true,
                last_quota_check: None,
                last_updated: None,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub async fn lock_state(&self) -> MutexGuard<'_, AccountState> {
        self.state.lock().await
    }

    /// Clones the current JWT for an upstream call.
    pub async fn current_jwt(&self) -> crate::Result<SecretString> {
        let state = self.state.lock().await;

        state
            .jwt
            .clone()
            .ok_or_else(|| LlmError::InternalError(Some(format!("account {} has no JWT", self.key))))
    }

    /// Unconditionally mints a new JWT, used when upstream rejects the
    /// current one mid-request. Static accounts cannot recover: they are
    /// marked out of quota for good.
    pub async fn force_refresh(&self, provider: &JetBrainsProvider) -> crate::Result<SecretString> {
        let mut state = self.state.lock().await;

        let Some(credentials) = self.credentials.as_ref() else {
            state.has_quota = false;
            return Err(LlmError::UpstreamAuth(format!(
                "static JWT for account {} was rejected and cannot be refreshed",
                self.key
            )));
        };

        log::debug!(
            "re-minting JWT for account {} (last issued {:?})",
            self.key,
            state.last_updated
        );

        token::refresh_locked(provider, credentials, &mut state, true).await
    }

    /// Marks the account out of quota after an upstream 477.
    pub async fn mark_exhausted(&self) {
        let mut state = self.state.lock().await;
        state.has_quota = false;
        state.last_quota_check = Some(Instant::now());
    }

    #[cfg(test)]
    pub fn for_tests(key: &str, jwt: &str, has_quota: bool) -> Self {
        Self {
            key: key.to_string(),
            credentials: None,
            state: Mutex::new(AccountState {
                jwt: Some(SecretString::from(jwt.to_string())),
                expires_at: None,
                has_quota,
                last_quota_check: Some(Instant::now()),
                last_updated: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(jwt: Option<&str>, expires_in: Option<Duration>) -> AccountState {
        let now = SystemTime::now();
        AccountState {
            jwt: jwt.map(|jwt| SecretString::from(jwt.to_string())),
            expires_at: expires_in.map(|d| now + d),
            has_quota: true,
            last_quota_check: None,
            last_updated: None,
        }
    }

    #[test]
    fn missing_jwt_needs_refresh() {
        assert!(state(None, None).needs_refresh(SystemTime::now()));
    }

    #[test]
    fn jwt_inside_refresh_window_needs_refresh() {
        let state = state(Some("jwt"), Some(Duration::from_secs(60 * 60)));
        assert!(state.needs_refresh(SystemTime::now()));
    }

    #[test]
    fn fresh_jwt_does_not_need_refresh() {
        let state = state(Some("jwt"), Some(REFRESH_AHEAD + Duration::from_secs(60 * 60)));
        assert!(!state.needs_refresh(SystemTime::now()));
    }

    #[test]
    fn static_jwt_without_expiry_is_used_as_is() {
        let state = state(Some("jwt"), None);
        assert!(!state.needs_refresh(SystemTime::now()));
        assert!(!state.is_expired(SystemTime::now()));
    }

    #[test]
    fn past_expiry_is_expired() {
        let now = SystemTime::now();
        let mut state = state(Some("jwt"), Some(Duration::from_secs(1)));
        state.expires_at = Some(now - Duration::from_secs(1));
        assert!(state.is_expired(now));
    }
}
