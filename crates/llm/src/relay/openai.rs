use crate::{
    ids,
    messages::openai::{
        ChatChoice, ChatChoiceDelta, ChatCompletionChunk, ChatCompletionResponse, ChatMessage,
        ChatMessageDelta, ChatRole, FinishReason, FunctionCall, FunctionDelta, FunctionStart,
        MessageContent, ObjectType, StreamingToolCall, ToolCall, ToolType, Usage,
    },
    provider::jetbrains::output::{FinishKind, StreamEvent},
    token_counter,
};

/// Emits `chat.completion.chunk` payloads for the upstream event stream.
///
/// The opening chunk carries the assistant role, one chunk follows per
/// upstream event, and the closing chunk carries the mapped finish reason.
/// The `data: [DONE]` terminator is appended by the HTTP handler.
pub(crate) struct OpenAIRelay {
    id: String,
    model: String,
    created: u64,
    current_tool: Option<u32>,
    next_tool_index: u32,
    finish_reason: Option<FinishReason>,
    emitted: bool,
}

impl OpenAIRelay {
    pub fn new(model: String) -> Self {
        Self {
            id: ids::chat_completion_id(),
            model,
            created: ids::unix_timestamp(),
            current_tool: None,
            next_tool_index: 0,
            finish_reason: None,
            emitted: false,
        }
    }

    /// The opening chunk announcing the assistant role.
    pub fn begin(&self) -> ChatCompletionChunk {
        self.chunk(
            ChatMessageDelta {
                role: Some(ChatRole::Assistant),
                content: None,
                tool_calls: None,
            },
            None,
        )
    }

    /// Feeds one upstream event, returning the chunk to emit, if any.
    pub fn on_event(&mut self, event: &StreamEvent) -> Option<ChatCompletionChunk> {
        match event {
            StreamEvent::Content { content } => {
                if content.is_empty() {
                    return None;
                }

                self.emitted = true;

                Some(self.chunk(
                    ChatMessageDelta {
                        role: None,
                        content: Some(content.clone()),
                        tool_calls: None,
                    },
                    None,
                ))
            }

            StreamEvent::ToolCall { id, name, content } => {
                if let (Some(id), Some(name)) = (id, name) {
                    return Some(self.open_tool(id.clone(), name.clone()));
                }

                content.as_ref().and_then(|fragment| self.tool_fragment(fragment))
            }

            StreamEvent::FunctionCall { name, content } => {
                if let Some(name) = name {
                    return Some(self.open_tool(ids::tool_use_id(), name.clone()));
                }

                content.as_ref().and_then(|fragment| self.tool_fragment(fragment))
            }

            StreamEvent::FinishMetadata { reason } => {
                if let Some(reason) = reason {
                    self.finish_reason = Some(map_finish_reason(FinishKind::from_reason(reason)));
                }

                None
            }

            StreamEvent::Unknown => None,
        }
    }

    /// The closing chunk carrying the finish reason.
    pub fn finish(&mut self) -> ChatCompletionChunk {
        let finish_reason = self.finish_reason.take().unwrap_or(FinishReason::Stop);

        self.chunk(
            ChatMessageDelta {
                role: None,
                content: None,
                tool_calls: None,
            },
            Some(finish_reason),
        )
    }

    pub fn succeeded(&self) -> bool {
        self.emitted
    }

    fn open_tool(&mut self, id: String, name: String) -> ChatCompletionChunk {
        let index = self.next_tool_index;
        self.next_tool_index += 1;
        self.current_tool = Some(index);
        self.emitted = true;

        self.chunk(
            ChatMessageDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![StreamingToolCall::Start {
                    index,
                    id,
                    r#type: ToolType::Function,
                    function: FunctionStart {
                        name,
                        arguments: String::new(),
                    },
                }]),
            },
            None,
        )
    }

    fn tool_fragment(&self, fragment: &str) -> Option<ChatCompletionChunk> {
        let Some(index) = self.current_tool else {
            log::debug!("dropping tool argument fragment with no open tool call");
            return None;
        };

        Some(self.chunk(
            ChatMessageDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![StreamingToolCall::Delta {
                    index,
                    function: FunctionDelta {
                        arguments: fragment.to_string(),
                    },
                }]),
            },
            None,
        ))
    }

    fn chunk(&self, delta: ChatMessageDelta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatChoiceDelta {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

/// Aggregates the upstream stream into a full chat completion for the
/// non-streaming path.
pub(crate) struct CompletionAccumulator {
    model: String,
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
}

impl CompletionAccumulator {
    pub fn new(model: String) -> Self {
        Self {
            model,
            text: String::new(),
            tool_calls: Vec::new(),
            finish_reason: None,
        }
    }

    pub fn on_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Content { content } => self.text.push_str(content),

            StreamEvent::ToolCall { id, name, content } => {
                if let (Some(id), Some(name)) = (id, name) {
                    self.open_tool(id.clone(), name.clone());
                }

                if let (Some(fragment), Some(call)) = (content, self.tool_calls.last_mut()) {
                    call.function.arguments.push_str(fragment);
                }
            }

            StreamEvent::FunctionCall { name, content } => {
                if let Some(name) = name {
                    self.open_tool(ids::tool_use_id(), name.clone());
                }

                if let (Some(fragment), Some(call)) = (content, self.tool_calls.last_mut()) {
                    call.function.arguments.push_str(fragment);
                }
            }

            StreamEvent::FinishMetadata { reason } => {
                if let Some(reason) = reason {
                    self.finish_reason = Some(map_finish_reason(FinishKind::from_reason(reason)));
                }
            }

            StreamEvent::Unknown => {}
        }
    }

    /// Builds the response. Prompt tokens are approximated by the caller from
    /// the translated request; completion tokens from the aggregated output.
    pub fn finish(self, prompt_tokens: u32) -> ChatCompletionResponse {
        let completion_len = self.text.len()
            + self
                .tool_calls
                .iter()
                .map(|call| call.function.arguments.len())
                .sum::<usize>();
        let completion_tokens = token_counter::approximate_tokens(completion_len);

        let finish_reason = self.finish_reason.unwrap_or(if self.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });

        let content = if self.text.is_empty() {
            None
        } else {
            Some(MessageContent::Text(self.text))
        };

        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(self.tool_calls)
        };

        ChatCompletionResponse {
            id: ids::chat_completion_id(),
            object: ObjectType::ChatCompletion,
            created: ids::unix_timestamp(),
            model: self.model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content,
                    tool_calls,
                    tool_call_id: None,
                },
                finish_reason,
            }],
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        }
    }

    /// Whether any content or tool call arrived.
    pub fn succeeded(&self) -> bool {
        !self.text.is_empty() || !self.tool_calls.is_empty()
    }

    fn open_tool(&mut self, id: String, name: String) {
        self.tool_calls.push(ToolCall {
            id,
            tool_type: ToolType::Function,
            function: FunctionCall {
                name,
                arguments: String::new(),
            },
        });
    }
}

fn map_finish_reason(kind: FinishKind) -> FinishReason {
    match kind {
        FinishKind::ToolCall => FinishReason::ToolCalls,
        FinishKind::Length => FinishReason::Length,
        FinishKind::Stop => FinishReason::Stop,
    }
}
