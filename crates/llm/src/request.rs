use axum::http::{HeaderMap, header::AUTHORIZATION};
use secrecy::SecretString;

const BEARER_PREFIX_LENGTH: usize = 6;

/// Per-request context extracted from the HTTP headers.
pub(crate) struct RequestContext {
    /// The API key the client presented, if any.
    pub api_key: Option<SecretString>,
}

/// Extracts the client credential from `Authorization: Bearer <key>` or the
/// `x-api-key` header. The bearer scheme is matched case-insensitively per
/// RFC 7235.
pub(crate) fn extract_context(headers: &HeaderMap) -> RequestContext {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            if value.len() > BEARER_PREFIX_LENGTH
                && value[..BEARER_PREFIX_LENGTH].eq_ignore_ascii_case("bearer")
                && value.as_bytes()[BEARER_PREFIX_LENGTH] == b' '
            {
                let key = value[BEARER_PREFIX_LENGTH + 1..].trim();
                (!key.is_empty()).then(|| key.to_string())
            } else {
                None
            }
        });

    let api_key = bearer.or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    });

    RequestContext {
        api_key: api_key.map(SecretString::from),
    }
}
