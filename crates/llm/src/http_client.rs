use std::{sync::OnceLock, time::Duration};

use axum::http;
use reqwest::Client;

/// Total request budget, generous enough for long streamed completions.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// TLS handshake and TCP connect budget.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long idle upstream connections stay pooled.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub(crate) fn default_http_client_builder() -> reqwest::ClientBuilder {
    let mut headers = http::HeaderMap::new();
    headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// Common HTTP client to re-use the same upstream connections as much as
/// possible.
pub(crate) fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            default_http_client_builder()
                .build()
                .expect("Failed to build default HTTP client")
        })
        .clone()
}
