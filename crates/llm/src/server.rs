//! The request dispatcher: authentication, model resolution, account
//! leasing, upstream dispatch with its retry ladder, and relay selection.

mod builder;

pub(crate) use builder::LlmServerBuilder;

use std::{collections::VecDeque, pin::Pin, sync::Arc, time::Instant};

use futures::{Stream, StreamExt, stream};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    account::{
        pool::{AccountLease, AccountPool},
        quota::QuotaCache,
    },
    error::LlmError,
    ids,
    messages::{
        anthropic::{
            AnthropicChatRequest, AnthropicChatResponse, AnthropicRole, AnthropicStreamEvent,
            AnthropicUsage,
        },
        openai::{
            ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Model,
            ModelsResponse, ObjectType,
        },
    },
    provider::{EventStream, jetbrains::JetBrainsProvider},
    relay::{
        anthropic::{AnthropicRelay, MessageAccumulator},
        openai::{CompletionAccumulator, OpenAIRelay},
    },
    request::RequestContext,
    telemetry::metrics::MetricsService,
    token_counter,
    translate::TranslatorPool,
};

pub(crate) type AnthropicEventStream = Pin<Box<dyn Stream<Item = AnthropicStreamEvent> + Send>>;
pub(crate) type OpenAIChunkStream = Pin<Box<dyn Stream<Item = ChatCompletionChunk> + Send>>;

#[derive(Clone)]
pub(crate) struct LlmServer {
    shared: Arc<LlmServerInner>,
}

pub(crate) struct LlmServerInner {
    pub(crate) pool: AccountPool,
    pub(crate) provider: Arc<JetBrainsProvider>,
    pub(crate) quota: Arc<QuotaCache>,
    pub(crate) models: config::ModelRegistry,
    pub(crate) translators: TranslatorPool,
    pub(crate) metrics: Arc<MetricsService>,
    pub(crate) client_keys: Vec<SecretString>,
}

impl LlmServer {
    pub(crate) fn from_inner(inner: LlmServerInner) -> Self {
        Self {
            shared: Arc::new(inner),
        }
    }

    /// Checks the presented client credential against the allow-list.
    pub fn authorize(&self, context: &RequestContext) -> crate::Result<()> {
        let Some(presented) = context.api_key.as_ref() else {
            return Err(LlmError::AuthenticationFailed("missing API key".to_string()));
        };

        let authorized = self
            .shared
            .client_keys
            .iter()
            .any(|key| key.expose_secret() == presented.expose_secret());

        if authorized {
            Ok(())
        } else {
            Err(LlmError::AuthenticationFailed("invalid API key".to_string()))
        }
    }

    /// The configured model listing.
    pub fn models(&self) -> ModelsResponse {
        ModelsResponse {
            object: ObjectType::List,
            data: self
                .shared
                .models
                .iter()
                .map(|model| Model {
                    id: model.id.clone(),
                    object: ObjectType::Model,
                    created: model.created.unwrap_or(0),
                    owned_by: model
                        .owned_by
                        .clone()
                        .unwrap_or_else(|| "jetbrains-ai".to_string()),
                })
                .collect(),
        }
    }

    fn resolve_model(&self, model: &str) -> crate::Result<String> {
        if model.is_empty() {
            return Err(LlmError::InvalidRequest("model is required".to_string()));
        }

        self.shared
            .models
            .resolve(model)
            .map(|descriptor| descriptor.upstream_id.clone())
            .ok_or_else(|| LlmError::ModelNotFound(model.to_string()))
    }

    /// Non-streaming OpenAI completion: aggregates the upstream stream into
    /// one response.
    pub async fn openai_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> crate::Result<ChatCompletionResponse> {
        let started = Instant::now();
        let profile = self.resolve_model(&request.model)?;

        if request.messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".to_string()));
        }

        let translated = self.shared.translators.acquire().translate_openai(&request);
        let prompt_tokens = token_counter::prompt_tokens(&translated.messages);
        let chat_request = translated.into_request(profile);

        let (mut upstream, lease) = self.open_stream(&chat_request).await.inspect_err(|_| {
            self.shared
                .metrics
                .record_request(&request.model, "-", started.elapsed(), false);
        })?;

        let mut accumulator = CompletionAccumulator::new(request.model.clone());

        while let Some(event) = upstream.next().await {
            match event {
                Ok(event) => accumulator.on_event(&event),
                Err(e) => {
                    log::warn!("upstream stream error mid-response: {e}");
                    break;
                }
            }
        }

        self.shared.metrics.record_request(
            &request.model,
            lease.account().key(),
            started.elapsed(),
            accumulator.succeeded(),
        );
        drop(lease);

        Ok(accumulator.finish(prompt_tokens))
    }

    /// Streaming OpenAI completion: one `chat.completion.chunk` per upstream
    /// event. The handler appends the `[DONE]` terminator.
    pub async fn openai_completion_stream(
        &self,
        request: ChatCompletionRequest,
    ) -> crate::Result<OpenAIChunkStream> {
        let started = Instant::now();
        let profile = self.resolve_model(&request.model)?;

        if request.messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".to_string()));
        }

        let translated = self.shared.translators.acquire().translate_openai(&request);
        let chat_request = translated.into_request(profile);

        let (upstream, lease) = self.open_stream(&chat_request).await.inspect_err(|_| {
            self.shared
                .metrics
                .record_request(&request.model, "-", started.elapsed(), false);
        })?;

        let relay = OpenAIRelay::new(request.model.clone());
        let tracker = RequestTracker::new(
            lease,
            self.shared.metrics.clone(),
            request.model.clone(),
            started,
        );

        let mut queue = VecDeque::new();
        queue.push_back(relay.begin());

        let state = OpenAIStreamState {
            upstream,
            relay,
            queue,
            finished: false,
            tracker,
        };

        let chunks = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(chunk) = state.queue.pop_front() {
                    return Some((chunk, state));
                }

                if state.finished {
                    let success = state.relay.succeeded();
                    state.tracker.complete(success);
                    return None;
                }

                match state.upstream.next().await {
                    Some(Ok(event)) => {
                        if let Some(chunk) = state.relay.on_event(&event) {
                            state.queue.push_back(chunk);
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("upstream stream error mid-response: {e}");
                        state.finished = true;
                        state.queue.push_back(state.relay.finish());
                    }
                    None => {
                        state.finished = true;
                        state.queue.push_back(state.relay.finish());
                    }
                }
            }
        });

        Ok(Box::pin(chunks))
    }

    /// Non-streaming Anthropic message.
    pub async fn anthropic_message(
        &self,
        request: AnthropicChatRequest,
    ) -> crate::Result<AnthropicChatResponse> {
        let started = Instant::now();
        let profile = self.validate_anthropic(&request)?;

        let translated = self.shared.translators.acquire().translate_anthropic(&request);
        let prompt_tokens = token_counter::prompt_tokens(&translated.messages);
        let chat_request = translated.into_request(profile);

        let (mut upstream, lease) = self.open_stream(&chat_request).await.inspect_err(|_| {
            self.shared
                .metrics
                .record_request(&request.model, "-", started.elapsed(), false);
        })?;

        let mut accumulator = MessageAccumulator::new();

        while let Some(event) = upstream.next().await {
            match event {
                Ok(event) => accumulator.on_event(&event),
                Err(e) => {
                    log::warn!("upstream stream error mid-response: {e}");
                    break;
                }
            }
        }

        let message = accumulator.finish();
        let success = !message.blocks.is_empty();

        self.shared.metrics.record_request(
            &request.model,
            lease.account().key(),
            started.elapsed(),
            success,
        );
        drop(lease);

        Ok(AnthropicChatResponse {
            id: ids::message_id(),
            r#type: "message".to_string(),
            role: AnthropicRole::Assistant,
            content: message.blocks,
            model: request.model,
            stop_reason: Some(message.stop_reason),
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: prompt_tokens,
                output_tokens: token_counter::approximate_tokens(message.output_len),
            },
        })
    }

    /// Streaming Anthropic message: the full `message_start` →
    /// `content_block_*` → `message_stop` event sequence.
    pub async fn anthropic_message_stream(
        &self,
        request: AnthropicChatRequest,
    ) -> crate::Result<AnthropicEventStream> {
        let started = Instant::now();
        let profile = self.validate_anthropic(&request)?;

        let translated = self.shared.translators.acquire().translate_anthropic(&request);
        let prompt_tokens = token_counter::prompt_tokens(&translated.messages);
        let chat_request = translated.into_request(profile);

        let (upstream, lease) = self.open_stream(&chat_request).await.inspect_err(|_| {
            self.shared
                .metrics
                .record_request(&request.model, "-", started.elapsed(), false);
        })?;

        let relay = AnthropicRelay::new(request.model.clone(), prompt_tokens);
        let tracker = RequestTracker::new(
            lease,
            self.shared.metrics.clone(),
            request.model.clone(),
            started,
        );

        let mut queue = VecDeque::new();
        queue.push_back(relay.begin());

        let state = AnthropicStreamState {
            upstream,
            relay,
            queue,
            finished: false,
            tracker,
        };

        let events = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.queue.pop_front() {
                    return Some((event, state));
                }

                if state.finished {
                    let success = state.relay.succeeded();
                    state.tracker.complete(success);
                    return None;
                }

                match state.upstream.next().await {
                    Some(Ok(event)) => state.queue.extend(state.relay.on_event(&event)),
                    Some(Err(e)) => {
                        log::warn!("upstream stream error mid-response: {e}");
                        state.finished = true;
                        state.queue.extend(state.relay.finish());
                    }
                    None => {
                        state.finished = true;
                        state.queue.extend(state.relay.finish());
                    }
                }
            }
        });

        Ok(Box::pin(events))
    }

    fn validate_anthropic(&self, request: &AnthropicChatRequest) -> crate::Result<String> {
        let profile = self.resolve_model(&request.model)?;

        if request.max_tokens == 0 {
            return Err(LlmError::InvalidRequest("max_tokens must be positive".to_string()));
        }

        if request.messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".to_string()));
        }

        Ok(profile)
    }

    /// Leases an account and opens the upstream stream, walking the retry
    /// ladder: a 401 triggers one in-place JWT refresh and retry on the same
    /// account, a 477 marks the account out of quota and moves to another.
    async fn open_stream(
        &self,
        chat_request: &crate::provider::jetbrains::input::ChatRequest,
    ) -> crate::Result<(EventStream, AccountLease)> {
        let max_switches = self.shared.pool.len().max(1);
        let mut switches = 0;

        loop {
            let lease = self.shared.pool.acquire().await?;
            let jwt = lease.account().current_jwt().await?;

            match self.shared.provider.chat_stream(chat_request, &jwt).await {
                Ok(stream) => return Ok((stream, lease)),

                Err(LlmError::UpstreamAuth(message)) => {
                    log::debug!(
                        "upstream rejected JWT for account {}: {message}",
                        lease.account().key()
                    );

                    match lease.account().force_refresh(&self.shared.provider).await {
                        Ok(jwt) => match self.shared.provider.chat_stream(chat_request, &jwt).await {
                            Ok(stream) => return Ok((stream, lease)),
                            Err(LlmError::UpstreamQuota(message)) => {
                                self.mark_exhausted(&lease, &jwt).await;
                                drop(lease);
                                switches += 1;
                                if switches >= max_switches {
                                    return Err(LlmError::UpstreamQuota(message));
                                }
                            }
                            Err(e) => return Err(e),
                        },
                        Err(e) => {
                            // Refresh failed; let another account take it.
                            log::debug!(
                                "JWT refresh failed for account {}: {e}",
                                lease.account().key()
                            );
                            drop(lease);
                            switches += 1;
                            if switches >= max_switches {
                                return Err(e);
                            }
                        }
                    }
                }

                Err(LlmError::UpstreamQuota(message)) => {
                    self.mark_exhausted(&lease, &jwt).await;
                    drop(lease);
                    switches += 1;
                    if switches >= max_switches {
                        return Err(LlmError::UpstreamQuota(message));
                    }
                }

                Err(e) => return Err(e),
            }
        }
    }

    async fn mark_exhausted(&self, lease: &AccountLease, jwt: &SecretString) {
        log::info!("account {} is out of quota, trying another", lease.account().key());
        lease.account().mark_exhausted().await;
        self.shared.quota.mark_exhausted(jwt);
    }
}

struct AnthropicStreamState {
    upstream: EventStream,
    relay: AnthropicRelay,
    queue: VecDeque<AnthropicStreamEvent>,
    finished: bool,
    tracker: RequestTracker,
}

struct OpenAIStreamState {
    upstream: EventStream,
    relay: OpenAIRelay,
    queue: VecDeque<ChatCompletionChunk>,
    finished: bool,
    tracker: RequestTracker,
}

/// Ties the account lease and the request metric to the streaming response's
/// lifetime. Completion records the outcome and releases the account; if the
/// client disconnects mid-stream the drop path records a failure and the
/// account is still released.
struct RequestTracker {
    lease: Option<AccountLease>,
    metrics: Arc<MetricsService>,
    model: String,
    account: String,
    started: Instant,
    completed: bool,
}

impl RequestTracker {
    fn new(lease: AccountLease, metrics: Arc<MetricsService>, model: String, started: Instant) -> Self {
        let account = lease.account().key().to_string();

        Self {
            lease: Some(lease),
            metrics,
            model,
            account,
            started,
            completed: false,
        }
    }

    fn complete(&mut self, success: bool) {
        if self.completed {
            return;
        }
        self.completed = true;

        self.metrics
            .record_request(&self.model, &self.account, self.started.elapsed(), success);
        self.lease.take();
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        if !self.completed {
            log::debug!("client went away mid-stream for model {}", self.model);
            self.complete(false);
        }
    }
}
