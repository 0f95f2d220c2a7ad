//! API-compatibility gateway core: OpenAI- and Anthropic-shaped chat
//! endpoints fulfilled by the JetBrains AI upstream.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

mod account;
mod error;
mod http_client;
mod ids;
mod media;
mod messages;
mod provider;
mod relay;
mod request;
mod server;
mod telemetry;
mod token_counter;
mod tools;
mod translate;

pub use error::{AcquireError, AnthropicResult, LlmError, LlmResult as Result};

use messages::{anthropic, openai};
use server::{LlmServer, LlmServerBuilder};

/// Creates the axum router for the gateway endpoints.
///
/// The shutdown token stops background work (statistics persistence) and
/// triggers the final snapshot flush.
pub async fn router(config: &config::Config, shutdown: CancellationToken) -> anyhow::Result<Router> {
    let server = Arc::new(
        LlmServerBuilder::new(config, shutdown)
            .build()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize gateway: {e}"))?,
    );

    let router = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .with_state(server);

    Ok(router)
}

/// Handle OpenAI-compatible chat completion requests.
///
/// This endpoint supports both streaming and non-streaming responses.
/// When `stream: true` is set in the request, the response is sent as
/// Server-Sent Events (SSE). Otherwise, a standard JSON response is returned.
async fn chat_completions(
    State(server): State<Arc<LlmServer>>,
    headers: HeaderMap,
    Sonic(request): Sonic<openai::ChatCompletionRequest>,
) -> Result<impl IntoResponse> {
    log::debug!("chat completions handler called for model: {}", request.model);
    log::debug!("Request has {} messages", request.messages.len());

    let context = request::extract_context(&headers);
    server.authorize(&context)?;

    if request.stream.unwrap_or(false) {
        let stream = server.openai_completion_stream(request).await?;

        let event_stream = stream.map(|chunk| {
            let json = sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                log::error!("Failed to serialize chunk: {e}");
                r#"{"error":"serialization failed"}"#.to_string()
            });

            Ok::<_, Infallible>(Event::default().data(json))
        });

        let with_done = event_stream.chain(futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().data("[DONE]"))
        }));

        log::debug!("Returning streaming response");
        Ok(Sse::new(with_done).into_response())
    } else {
        let response = server.openai_completion(request).await?;

        log::debug!(
            "Chat completion successful, returning response with {} choices",
            response.choices.len()
        );

        Ok(Json(response).into_response())
    }
}

/// Handle Anthropic-compatible message requests.
///
/// Streaming responses carry the full Anthropic event sequence
/// (`message_start` → `content_block_*` → `message_stop`) with named SSE
/// events; non-streaming responses return the aggregated message.
async fn anthropic_messages(
    State(server): State<Arc<LlmServer>>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::AnthropicChatRequest>,
) -> AnthropicResult<impl IntoResponse> {
    log::debug!("messages handler called for model: {}", request.model);
    log::debug!("Request has {} messages", request.messages.len());

    let context = request::extract_context(&headers);
    server.authorize(&context)?;

    if request.stream.unwrap_or(false) {
        let stream = server.anthropic_message_stream(request).await?;

        let event_stream = stream.map(|event| {
            let json = sonic_rs::to_string(&event).unwrap_or_else(|e| {
                log::error!("Failed to serialize streaming event: {e}");
                r#"{"type":"error","error":{"type":"api_error","message":"serialization failed"}}"#
                    .to_string()
            });

            Ok::<_, Infallible>(Event::default().event(event.event_name()).data(json))
        });

        // No [DONE] marker here: the Anthropic protocol ends with message_stop.
        log::debug!("Returning streaming response");
        Ok(Sse::new(event_stream).into_response())
    } else {
        let response = server.anthropic_message(request).await?;

        log::debug!("Message completion successful");
        Ok(Json(response).into_response())
    }
}

/// Handle list models requests.
async fn list_models(
    State(server): State<Arc<LlmServer>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let context = request::extract_context(&headers);
    server.authorize(&context)?;

    let response = server.models();

    log::debug!("Returning {} models", response.data.len());
    Ok(Json(response))
}

/// Unauthenticated liveness probe.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;

    async fn test_router(dir: &tempfile::TempDir) -> Router {
        let models_path = dir.path().join("models.json");
        std::fs::write(
            &models_path,
            r#"{"models": [{"id": "claude-4-sonnet", "upstream_id": "anthropic-claude-4-sonnet"}]}"#,
        )
        .unwrap();

        let config = config::Config {
            server: config::ServerConfig { port: 0 },
            client_keys: vec![SecretString::from("sk-test".to_string())],
            accounts: vec![config::AccountConfig {
                key: "static-1".to_string(),
                credentials: None,
                static_jwt: Some(SecretString::from("test-jwt".to_string())),
            }],
            storage: config::StorageConfig::File(dir.path().join("stats.json")),
            models: config::ModelRegistry::load(&models_path).unwrap(),
        };

        router(&config, CancellationToken::new()).await.unwrap()
    }

    fn post(uri: &str, auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");

        if let Some(key) = auth {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }

        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn missing_client_key_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = post(
            "/v1/chat/completions",
            None,
            r#"{"model": "claude-4-sonnet", "messages": [{"role": "user", "content": "hi"}]}"#,
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_client_key_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = post(
            "/v1/chat/completions",
            Some("sk-wrong"),
            r#"{"model": "claude-4-sonnet", "messages": [{"role": "user", "content": "hi"}]}"#,
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = post("/v1/chat/completions", Some("sk-test"), "{not json");

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_model_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = post(
            "/v1/chat/completions",
            Some("sk-test"),
            r#"{"messages": [{"role": "user", "content": "hi"}]}"#,
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = post(
            "/v1/chat/completions",
            Some("sk-test"),
            r#"{"model": "gpt-unknown", "messages": [{"role": "user", "content": "hi"}]}"#,
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_messages_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = post(
            "/v1/chat/completions",
            Some("sk-test"),
            r#"{"model": "claude-4-sonnet", "messages": []}"#,
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn anthropic_zero_max_tokens_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = post(
            "/v1/messages",
            Some("sk-test"),
            r#"{"model": "claude-4-sonnet", "max_tokens": 0, "messages": [{"role": "user", "content": "hi"}]}"#,
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn models_listing_requires_auth() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = Request::builder()
            .method("GET")
            .uri("/v1/models")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn models_listing_returns_configured_models() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = Request::builder()
            .method("GET")
            .uri("/v1/models")
            .header("x-api-key", "sk-test")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir).await;

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
