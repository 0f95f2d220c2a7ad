use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the OpenAI Chat Completions API.
///
/// Mirrors the request format documented in the
/// [OpenAI API Reference](https://platform.openai.com/docs/api-reference/chat).
/// Only the fields the gateway acts on are modeled; sampling parameters it
/// cannot forward are accepted and ignored so existing clients keep working.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// The model to use for the completion. Validated by the dispatcher so a
    /// missing field reports a clean error instead of a deserialization one.
    #[serde(default)]
    pub model: String,

    /// The conversation so far.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools the model may call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Controls how the model uses tools. Accepted for compatibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Controls randomness in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// Role of a message author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions that guide model behavior.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Result of a tool invocation, referencing a prior tool call.
    Tool,
    /// Any other role. Translated permissively as user input.
    #[serde(untagged)]
    Other(String),
}

/// One message in the conversation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    /// The author role.
    pub role: ChatRole,

    /// Message content: a plain string or an array of typed parts.
    /// `None` is valid for assistant messages that only carry tool calls.
    #[serde(default)]
    pub content: Option<MessageContent>,

    /// Tool calls issued by an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For `tool` messages, the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Flexible content container: OpenAI clients send either a scalar string or
/// an ordered list of typed parts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content.
    Text(String),
    /// Multi-part content mixing text and images.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// All text carried by this content, parts joined with newlines.
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One entry of a multi-part content array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },

    /// An image reference, typically a base64 data URL.
    ImageUrl {
        /// The image source.
        image_url: ImageUrl,
    },
}

/// Image source inside a content part.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageUrl {
    /// The URL; the gateway only accepts `data:` URLs.
    pub url: String,

    /// Requested detail level. Accepted for compatibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// Tool kind; always `function`.
    #[serde(rename = "type")]
    pub tool_type: ToolType,

    /// The function description.
    pub function: FunctionDefinition,
}

/// The only tool kind the protocol defines today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    /// A callable function.
    Function,
}

/// Declared function a model may call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDefinition {
    /// The function name.
    pub name: String,

    /// What the function does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema of the accepted arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// A tool call issued by the assistant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    /// Unique identifier of this call, referenced by the tool result.
    pub id: String,

    /// Call kind; always `function`.
    #[serde(rename = "type")]
    pub tool_type: ToolType,

    /// The invoked function.
    pub function: FunctionCall,
}

/// Function name plus serialized arguments of a tool call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCall {
    /// The function name.
    pub name: String,

    /// The arguments as a JSON-encoded string.
    pub arguments: String,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    Stop,
    /// The token limit was reached.
    Length,
    /// The model decided to call tools.
    ToolCalls,
    /// Any other reason, passed through verbatim.
    #[serde(untagged)]
    Other(String),
}

/// Discriminator strings used in `object` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectType {
    /// A full chat completion.
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    /// One streamed chunk of a chat completion.
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
    /// A model descriptor.
    #[serde(rename = "model")]
    Model,
    /// A paginated list.
    #[serde(rename = "list")]
    List,
}

/// Non-streaming response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Unique identifier, `chatcmpl-<nanos>`.
    pub id: String,

    /// Always `chat.completion`.
    pub object: ObjectType,

    /// Unix timestamp of creation.
    pub created: u64,

    /// The public model id the client asked for.
    pub model: String,

    /// Generated choices; the gateway always produces exactly one.
    pub choices: Vec<ChatChoice>,

    /// Approximated token usage.
    pub usage: Usage,
}

/// One generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index, always 0.
    pub index: u32,

    /// The generated message.
    pub message: ChatMessage,

    /// Why generation stopped.
    pub finish_reason: FinishReason,
}

/// Token usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Sum of the above.
    pub total_tokens: u32,
}

/// One streamed chunk of a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Identifier shared by all chunks of one response.
    pub id: String,

    /// Always `chat.completion.chunk`.
    pub object: ObjectType,

    /// Unix timestamp of creation, identical across chunks.
    pub created: u64,

    /// The public model id.
    pub model: String,

    /// Incremental choice updates.
    pub choices: Vec<ChatChoiceDelta>,
}

/// Incremental update for one choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceDelta {
    /// Choice index, always 0.
    pub index: u32,

    /// The incremental message delta.
    pub delta: ChatMessageDelta,

    /// Set on the final content chunk only.
    pub finish_reason: Option<FinishReason>,
}

/// Delta payload of a streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageDelta {
    /// Present on the opening chunk only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,

    /// Incremental text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Incremental tool call updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<StreamingToolCall>>,
}

/// Incremental tool call entry: a `Start` opens a call with its id and name,
/// subsequent `Delta` entries append argument fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamingToolCall {
    /// Opens a new tool call.
    Start {
        /// Position of the call within the assistant turn.
        index: u32,
        /// Unique identifier of the call.
        id: String,
        /// Call kind; always `function`.
        r#type: ToolType,
        /// Function name plus empty initial arguments.
        function: FunctionStart,
    },

    /// Appends argument text to the call at `index`.
    Delta {
        /// Position of the call within the assistant turn.
        index: u32,
        /// The appended fragment.
        function: FunctionDelta,
    },
}

/// Opening payload of a streamed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionStart {
    /// The function name.
    pub name: String,
    /// Initial arguments, always empty.
    pub arguments: String,
}

/// Argument fragment of a streamed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// The appended fragment of the JSON arguments string.
    pub arguments: String,
}

/// One entry of the model listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// The model identifier.
    pub id: String,
    /// Always `model`.
    pub object: ObjectType,
    /// Unix timestamp when the model was published.
    pub created: u64,
    /// The owner displayed in listings.
    pub owned_by: String,
}

/// Response body of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// Always `list`.
    pub object: ObjectType,
    /// The configured models.
    pub data: Vec<Model>,
}
