//! JWT expiry parsing and the refresh-under-lock path.

use std::time::SystemTime;

use jwt_compact::UntrustedToken;
use secrecy::{ExposeSecret, SecretString};

use crate::{
    account::{AccountState, Credentials},
    error::LlmError,
    provider::jetbrains::JetBrainsProvider,
};

/// Derives the absolute expiry from a JWT's `exp` claim. The token is never
/// signature-verified; the gateway only needs the timestamp.
pub(crate) fn parse_expiry(jwt: &str) -> crate::Result<SystemTime> {
    let token = UntrustedToken::new(jwt)
        .map_err(|e| LlmError::UpstreamParse(format!("malformed JWT: {e}")))?;

    let claims = token
        .deserialize_claims_unchecked::<serde_json::Value>()
        .map_err(|e| LlmError::UpstreamParse(format!("undecodable JWT claims: {e}")))?;

    let expiration = claims
        .expiration
        .ok_or_else(|| LlmError::UpstreamParse("JWT carries no exp claim".to_string()))?;

    Ok(SystemTime::from(expiration))
}

/// Mints a new JWT for the account. Must be called with the account's state
/// lock held; unless `force` is set, staleness is re-verified under the lock
/// so concurrent waiters collapse into a single upstream issuance.
pub(crate) async fn refresh_locked(
    provider: &JetBrainsProvider,
    credentials: &Credentials,
    state: &mut AccountState,
    force: bool,
) -> crate::Result<SecretString> {
    if !force
        && !state.needs_refresh(SystemTime::now())
        && let Some(jwt) = state.jwt.clone()
    {
        return Ok(jwt);
    }

    let jwt = provider
        .issue_jwt(&credentials.license_id, &credentials.authorization)
        .await?;

    let expires_at = parse_expiry(jwt.expose_secret())?;

    state.jwt = Some(jwt.clone());
    state.expires_at = Some(expires_at);
    state.last_updated = Some(SystemTime::now());

    log::debug!(
        "minted JWT for license {}, expires at {expires_at:?}",
        credentials.license_id
    );

    Ok(jwt)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    use super::*;

    fn unsigned_jwt(exp: u64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user","exp":{exp}}}"#));
        let signature = URL_SAFE_NO_PAD.encode(b"sig");
        format!("{header}.{payload}.{signature}")
    }

    #[test]
    fn parse_expiry_reads_exp_claim() {
        let exp = 2_000_000_000;
        let expiry = parse_expiry(&unsigned_jwt(exp)).unwrap();
        assert_eq!(expiry, UNIX_EPOCH + Duration::from_secs(exp));
    }

    #[test]
    fn parse_expiry_rejects_garbage() {
        assert!(parse_expiry("not-a-jwt").is_err());
        assert!(parse_expiry("").is_err());
    }

    #[test]
    fn parse_expiry_requires_exp() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"user"}"#);
        let jwt = format!("{header}.{payload}.{}", URL_SAFE_NO_PAD.encode(b"sig"));

        assert!(parse_expiry(&jwt).is_err());
    }
}
