pub(crate) mod input;
pub(crate) mod output;

use eventsource_stream::Eventsource;
use futures::{StreamExt, future};
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use self::{
    input::ChatRequest,
    output::{Frame, classify_data},
};

use crate::{
    account::quota::QuotaSnapshot,
    error::LlmError,
    http_client::http_client,
    provider::EventStream,
};

const DEFAULT_API_URL: &str = "https://api.jetbrains.ai";

const JWT_PATH: &str = "/auth/jetbrains-jwt/provide-access/license/v2";
const QUOTA_PATH: &str = "/user/v5/quota/get";
const CHAT_PATH: &str = "/user/v5/llm/chat/stream/v8";

/// Status the quota and chat endpoints use to signal an exhausted account.
pub(crate) const QUOTA_EXHAUSTED_STATUS: u16 = 477;

/// Client identification headers the upstream expects on every call.
const USER_AGENT: &str = "ktor-client";
const GRAZIE_AGENT: &str = r#"{"name":"aia:pycharm","version":"251.26094.80.13:251.26094.141"}"#;

/// HTTP client for the three upstream RPCs: JWT issuance, quota probing, and
/// the streaming chat call.
pub(crate) struct JetBrainsProvider {
    client: Client,
    base_url: String,
}

impl JetBrainsProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_API_URL.to_string())
    }

    /// Used by tests to point the provider at a local stub.
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: http_client(),
            base_url,
        }
    }

    /// Mints a fresh JWT for a license using its static authorization
    /// credential. Failures are returned verbatim so the caller can move on
    /// to another account.
    pub async fn issue_jwt(
        &self,
        license_id: &str,
        authorization: &SecretString,
    ) -> crate::Result<SecretString> {
        let url = format!("{}{JWT_PATH}", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", authorization.expose_secret()))
            .header("User-Agent", USER_AGENT)
            .header("grazie-agent", GRAZIE_AGENT)
            .json(&serde_json::json!({ "licenseId": license_id }))
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(format!("JWT issuance request failed: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::warn!("JWT issuance failed for license {license_id} ({status}): {error_text}");

            return Err(match status.as_u16() {
                401 | 403 => LlmError::UpstreamAuth(error_text),
                other => LlmError::UpstreamApi {
                    status: other,
                    message: error_text,
                },
            });
        }

        #[derive(Deserialize)]
        struct ProvideAccessResponse {
            #[serde(default)]
            token: Option<String>,
            #[serde(default)]
            jwt: Option<String>,
        }

        let body: ProvideAccessResponse = response
            .json()
            .await
            .map_err(|e| LlmError::UpstreamParse(format!("JWT issuance response: {e}")))?;

        let token = body
            .token
            .or(body.jwt)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| LlmError::UpstreamParse("JWT issuance response carried no token".to_string()))?;

        Ok(SecretString::from(token))
    }

    /// Probes the quota endpoint with the given JWT. Status 477 maps to an
    /// exhausted snapshot rather than an error.
    pub async fn fetch_quota(&self, jwt: &SecretString) -> crate::Result<QuotaSnapshot> {
        let url = format!("{}{QUOTA_PATH}", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .header("grazie-agent", GRAZIE_AGENT)
            .header("grazie-authenticate-jwt", jwt.expose_secret())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(format!("quota request failed: {e}")))?;

        let status = response.status();

        if status.as_u16() == QUOTA_EXHAUSTED_STATUS {
            return Ok(QuotaSnapshot::exhausted());
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

            return Err(match status.as_u16() {
                401 | 403 => LlmError::UpstreamAuth(error_text),
                other => LlmError::UpstreamApi {
                    status: other,
                    message: error_text,
                },
            });
        }

        #[derive(Deserialize)]
        struct QuotaResponse {
            #[serde(default)]
            current: Option<QuotaAmount>,
            #[serde(default)]
            maximum: Option<QuotaAmount>,
            #[serde(default)]
            until: Option<String>,
        }

        #[derive(Deserialize)]
        struct QuotaAmount {
            amount: String,
        }

        let body: QuotaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::UpstreamParse(format!("quota response: {e}")))?;

        let used = body.current.as_ref().and_then(|a| a.amount.parse::<f64>().ok());
        let maximum = body.maximum.as_ref().and_then(|a| a.amount.parse::<f64>().ok());

        // A parseable pair with nothing left means exhausted; missing or
        // unparseable figures are treated as available to avoid locking out
        // accounts on a cosmetic payload change.
        let has_quota = match (used, maximum) {
            (Some(used), Some(maximum)) => maximum - used > 0.0,
            _ => true,
        };

        Ok(QuotaSnapshot {
            has_quota,
            used,
            maximum,
            until: body.until,
        })
    }

    /// Opens the streaming chat call and returns the decoded upstream event
    /// stream. The stream ends at the upstream `end`/`[DONE]` terminator or
    /// when the connection closes.
    pub async fn chat_stream(&self, request: &ChatRequest, jwt: &SecretString) -> crate::Result<EventStream> {
        let url = format!("{}{CHAT_PATH}", self.base_url);

        let body = sonic_rs::to_vec(request)
            .map_err(|e| LlmError::InvalidRequest(format!("Failed to serialize upstream request: {e}")))?;

        let response = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .header("Content-Type", "application/json")
            .header("Cache-Control", "no-cache")
            .header("Accept-Charset", "UTF-8")
            .header("User-Agent", USER_AGENT)
            .header("grazie-agent", GRAZIE_AGENT)
            .header("grazie-authenticate-jwt", jwt.expose_secret())
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(format!("Failed to send chat request: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("upstream chat error ({status}): {error_text}");

            return Err(match status.as_u16() {
                401 => LlmError::UpstreamAuth(error_text),
                QUOTA_EXHAUSTED_STATUS => LlmError::UpstreamQuota(error_text),
                other => LlmError::UpstreamApi {
                    status: other,
                    message: error_text,
                },
            });
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .scan(false, |done, frame| {
                if *done {
                    return future::ready(None);
                }

                let item = match frame {
                    Ok(frame) => match classify_data(&frame.data) {
                        Some(Frame::Event(event)) => Some(Ok(event)),
                        Some(Frame::Done) => {
                            *done = true;
                            None
                        }
                        None => None,
                    },
                    Err(e) => {
                        log::warn!("SSE parsing error in upstream stream: {e}");
                        None
                    }
                };

                future::ready(Some(item))
            })
            .filter_map(future::ready);

        Ok(Box::pin(events))
    }
}
