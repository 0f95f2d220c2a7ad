use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the Anthropic Messages API.
///
/// Represents the request format for creating messages as documented in the
/// [Anthropic API Reference](https://docs.anthropic.com/en/api/messages).
/// The format differs from OpenAI's in several key ways:
/// - Content is an array of typed blocks (with a scalar-string shorthand)
/// - The system prompt travels outside the messages array
/// - Tool use is expressed as `tool_use`/`tool_result` content blocks
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicChatRequest {
    /// The model to use for the completion. Validated by the dispatcher so a
    /// missing field reports a clean error instead of a deserialization one.
    #[serde(default)]
    pub model: String,

    /// The messages to send to the model, alternating user and assistant.
    #[serde(default)]
    pub messages: Vec<AnthropicMessage>,

    /// Maximum number of tokens to generate. Must be positive; the default
    /// of zero is rejected by the dispatcher.
    #[serde(default)]
    pub max_tokens: u32,

    /// System prompt setting context for the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Controls randomness in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Only sample from the top K tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Sequences that will cause the model to stop generating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools available for the model to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,

    /// Controls how the model uses tools. Accepted for compatibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// System prompt: a scalar string or an array of text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Plain text system prompt.
    Text(String),
    /// Structured system prompt blocks.
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// All text of the prompt, blocks joined with newlines.
    pub fn joined_text(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .map(|block| block.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One block of a structured system prompt.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemBlock {
    /// Block kind; always `text`.
    #[serde(rename = "type")]
    pub block_type: String,
    /// The text content.
    pub text: String,
}

/// An Anthropic message with role and content.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicMessage {
    /// The role of the message sender.
    pub role: AnthropicRole,

    /// The content, either a scalar string or an array of blocks.
    pub content: AnthropicMessageContent,
}

/// Flexible message content: scalar-string shorthand or block array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnthropicMessageContent {
    /// Scalar text shorthand for a single text block.
    Text(String),
    /// Ordered content blocks.
    Blocks(Vec<AnthropicContent>),
}

/// Role of a message sender in Anthropic's API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
    /// User message
    User,
    /// Assistant message
    Assistant,
}

/// Content block in an Anthropic message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum AnthropicContent {
    /// Plain text content.
    #[serde(rename = "text")]
    Text {
        /// The text content
        text: String,
    },

    /// Image content.
    #[serde(rename = "image")]
    Image {
        /// The image source
        source: AnthropicImageSource,
    },

    /// Tool use request from the assistant.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Unique identifier for this tool use
        id: String,
        /// Name of the tool to use
        name: String,
        /// Input parameters for the tool
        input: Value,
    },

    /// Result from a tool execution, sent back in a user message.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The tool use ID this result corresponds to
        tool_use_id: String,
        /// The result content
        #[serde(default)]
        content: Option<ToolResultContent>,
    },
}

/// Content of a tool result: scalar-string shorthand or text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain text result.
    Text(String),
    /// Structured result blocks.
    Blocks(Vec<ToolResultBlock>),
}

impl ToolResultContent {
    /// All text of the result, blocks joined with newlines.
    pub fn joined_text(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ToolResultBlock::Text { text } => Some(text.as_str()),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One block of a structured tool result.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ToolResultBlock {
    /// Text result from tool execution
    #[serde(rename = "text")]
    Text {
        /// The text content
        text: String,
    },
}

/// Image source for image content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicImageSource {
    /// The type of image source (always "base64")
    #[serde(rename = "type")]
    pub source_type: String,

    /// The media type of the image (e.g., "image/jpeg")
    pub media_type: String,

    /// Base64-encoded image data
    pub data: String,
}

/// Tool definition in Anthropic format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicTool {
    /// The name of the tool
    pub name: String,

    /// Description of what the tool does
    #[serde(default)]
    pub description: Option<String>,

    /// JSON Schema for the tool's input parameters
    pub input_schema: Value,
}

/// Response from the Anthropic Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicChatResponse {
    /// Unique identifier for this completion, `msg_<nanos>`.
    pub id: String,

    /// The type of response (always "message")
    pub r#type: String,

    /// The role of the response (always "assistant")
    pub role: AnthropicRole,

    /// The content of the response
    pub content: Vec<AnthropicContent>,

    /// The model that generated the response
    pub model: String,

    /// Stop reason for the completion
    pub stop_reason: Option<AnthropicStopReason>,

    /// Stop sequence that caused the model to stop, if any
    pub stop_sequence: Option<String>,

    /// Token usage statistics
    pub usage: AnthropicUsage,
}

/// The reason why the model stopped generating tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AnthropicStopReason {
    /// The model reached a natural stopping point.
    EndTurn,
    /// The generation exceeded the maximum token limit.
    MaxTokens,
    /// The model encountered a stop sequence specified in the request.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
}

impl fmt::Display for AnthropicStopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnthropicStopReason::EndTurn => write!(f, "end_turn"),
            AnthropicStopReason::MaxTokens => write!(f, "max_tokens"),
            AnthropicStopReason::StopSequence => write!(f, "stop_sequence"),
            AnthropicStopReason::ToolUse => write!(f, "tool_use"),
        }
    }
}

/// Token usage statistics in Anthropic format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnthropicUsage {
    /// Number of input tokens
    pub input_tokens: u32,

    /// Number of output tokens
    pub output_tokens: u32,
}

/// Error response body in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always "error".
    #[serde(rename = "type")]
    pub error_type: String,

    /// Error details
    pub error: AnthropicErrorDetails,
}

/// Error details in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicErrorDetails {
    /// The type of error that occurred
    #[serde(rename = "type")]
    pub error_type: String,

    /// Human-readable error message
    pub message: String,
}

/// Streaming event types for Anthropic SSE responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicStreamEvent {
    /// Start of a message
    #[serde(rename = "message_start")]
    MessageStart {
        /// The initial message metadata
        message: AnthropicStreamMessageStart,
    },

    /// Content block start
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        /// The index of the content block
        index: u32,
        /// The content block being started
        content_block: AnthropicContent,
    },

    /// Incremental content update
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        /// The index of the content block
        index: u32,
        /// The delta update
        delta: AnthropicContentDelta,
    },

    /// Content block finished
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        /// The index of the content block
        index: u32,
    },

    /// Final message metadata: stop reason and output usage
    #[serde(rename = "message_delta")]
    MessageDelta {
        /// Delta update for the message
        delta: AnthropicMessageDelta,
        /// Output token usage
        usage: AnthropicDeltaUsage,
    },

    /// End of message stream
    #[serde(rename = "message_stop")]
    MessageStop,

    /// Error event
    #[serde(rename = "error")]
    Error {
        /// The error that occurred
        error: AnthropicErrorDetails,
    },
}

impl AnthropicStreamEvent {
    /// The SSE `event:` name for this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            AnthropicStreamEvent::MessageStart { .. } => "message_start",
            AnthropicStreamEvent::ContentBlockStart { .. } => "content_block_start",
            AnthropicStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            AnthropicStreamEvent::ContentBlockStop { .. } => "content_block_stop",
            AnthropicStreamEvent::MessageDelta { .. } => "message_delta",
            AnthropicStreamEvent::MessageStop => "message_stop",
            AnthropicStreamEvent::Error { .. } => "error",
        }
    }
}

/// Initial message metadata for streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicStreamMessageStart {
    /// Unique message ID
    pub id: String,

    /// The type (always "message")
    #[serde(rename = "type")]
    pub message_type: String,

    /// The role (always "assistant")
    pub role: AnthropicRole,

    /// Initial empty content array
    pub content: Vec<AnthropicContent>,

    /// The model being used
    pub model: String,

    /// Stop reason, always null at start
    pub stop_reason: Option<AnthropicStopReason>,

    /// Stop sequence, always null at start
    pub stop_sequence: Option<String>,

    /// Initial usage statistics
    pub usage: AnthropicUsage,
}

/// Delta update for content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicContentDelta {
    /// Text delta
    #[serde(rename = "text_delta")]
    TextDelta {
        /// Additional text content
        text: String,
    },

    /// Tool use input delta
    #[serde(rename = "input_json_delta")]
    InputJsonDelta {
        /// Partial JSON string for tool input
        partial_json: String,
    },
}

/// Message delta for streaming responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessageDelta {
    /// Stop reason if the message is complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<AnthropicStopReason>,

    /// Stop sequence if one was encountered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

/// Usage attached to `message_delta` events: output tokens only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnthropicDeltaUsage {
    /// Number of output tokens so far
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_scalar_and_block_content() {
        let request: AnthropicChatRequest = serde_json::from_value(json!({
            "model": "claude-4-sonnet",
            "max_tokens": 1024,
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": [{"type": "text", "text": "hi"}]}
            ]
        }))
        .unwrap();

        assert!(matches!(
            &request.messages[0].content,
            AnthropicMessageContent::Text(text) if text == "hello"
        ));

        let AnthropicMessageContent::Blocks(blocks) = &request.messages[1].content else {
            unreachable!("expected block content");
        };
        assert!(matches!(&blocks[0], AnthropicContent::Text { text } if text == "hi"));
    }

    #[test]
    fn deserialize_system_prompt_shapes() {
        let scalar: SystemPrompt = serde_json::from_value(json!("be brief")).unwrap();
        assert_eq!(scalar.joined_text(), "be brief");

        let blocks: SystemPrompt = serde_json::from_value(json!([
            {"type": "text", "text": "be brief"},
            {"type": "text", "text": "be kind"}
        ]))
        .unwrap();
        assert_eq!(blocks.joined_text(), "be brief\nbe kind");
    }

    #[test]
    fn deserialize_tool_result_shapes() {
        let scalar: ToolResultContent = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(scalar.joined_text(), "42");

        let blocks: ToolResultContent =
            serde_json::from_value(json!([{"type": "text", "text": "42"}])).unwrap();
        assert_eq!(blocks.joined_text(), "42");
    }

    #[test]
    fn deserialize_tool_use_block() {
        let content: AnthropicContent = serde_json::from_value(json!({
            "type": "tool_use",
            "id": "toolu_123",
            "name": "get_weather",
            "input": {"city": "Beijing"}
        }))
        .unwrap();

        let AnthropicContent::ToolUse { id, name, input } = content else {
            unreachable!("expected tool use");
        };
        assert_eq!(id, "toolu_123");
        assert_eq!(name, "get_weather");
        assert_eq!(input["city"], "Beijing");
    }

    #[test]
    fn serialize_streaming_events() {
        let event = AnthropicStreamEvent::ContentBlockStart {
            index: 0,
            content_block: AnthropicContent::ToolUse {
                id: "toolu_only".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "Beijing"}),
            },
        };

        assert_eq!(event.event_name(), "content_block_start");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content_block_start");
        assert_eq!(json["index"], 0);
        assert_eq!(json["content_block"]["type"], "tool_use");
        assert_eq!(json["content_block"]["input"]["city"], "Beijing");

        let delta = AnthropicStreamEvent::ContentBlockDelta {
            index: 2,
            delta: AnthropicContentDelta::TextDelta {
                text: "world".to_string(),
            },
        };

        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["delta"]["type"], "text_delta");
        assert_eq!(json["delta"]["text"], "world");
    }

    #[test]
    fn serialize_message_stop() {
        let json = serde_json::to_value(AnthropicStreamEvent::MessageStop).unwrap();
        assert_eq!(json, json!({"type": "message_stop"}));
    }
}
