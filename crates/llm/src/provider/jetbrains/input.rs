use serde::{Deserialize, Serialize};

/// Fixed prompt identifier the upstream chat endpoint expects on every call.
pub(crate) const CHAT_PROMPT: &str = "ij.chat.request.new-chat-on-start";

/// Request body for the upstream chat endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    /// Always [`CHAT_PROMPT`].
    pub prompt: &'static str,

    /// The upstream profile (model) handling the request.
    pub profile: String,

    /// The translated conversation.
    pub chat: Chat,

    /// Tool definitions, attached only when the request carries tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ChatParameters>,
}

/// Conversation container.
#[derive(Debug, Serialize)]
pub(crate) struct Chat {
    pub messages: Vec<ChatMessage>,
}

/// Additional request data; today only the serialized tool definitions.
#[derive(Debug, Serialize)]
pub(crate) struct ChatParameters {
    pub data: Vec<DataEntry>,
}

/// One parameters entry. The upstream protocol ships tools as a JSON string
/// under a `json`-typed entry.
#[derive(Debug, Serialize)]
pub(crate) struct DataEntry {
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    pub fqdn: String,
}

impl DataEntry {
    pub fn json(payload: String) -> Self {
        Self {
            entry_type: "json",
            fqdn: payload,
        }
    }
}

/// The upstream message vocabulary.
///
/// Unlike the public protocols, the upstream format is flat: one entry per
/// text turn, tool call, tool result, or image. Images never share an entry
/// with text; adjacent text travels as a separate `user_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ChatMessage {
    /// End-user text turn.
    UserMessage { content: String },

    /// System prompt turn.
    SystemMessage { content: String },

    /// Plain assistant turn (legacy spelling kept for wire compatibility).
    AssistantMessage { content: String },

    /// Assistant text turn.
    AssistantMessageText { content: String },

    /// One tool invocation by the assistant. `content` carries the
    /// canonicalized JSON arguments.
    AssistantMessageTool {
        id: String,
        tool_name: String,
        content: String,
    },

    /// Result of a tool invocation. `id` must reference a previously emitted
    /// `assistant_message_tool`.
    ToolMessage {
        id: String,
        tool_name: String,
        result: String,
    },

    /// Standalone image payload.
    MediaMessage { media_type: String, data: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_tags_use_snake_case() {
        let message = ChatMessage::AssistantMessageTool {
            id: "call_1".to_string(),
            tool_name: "get_weather".to_string(),
            content: "{\"city\":\"Beijing\"}".to_string(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "assistant_message_tool");
        assert_eq!(json["tool_name"], "get_weather");

        let media = ChatMessage::MediaMessage {
            media_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        };
        assert_eq!(serde_json::to_value(&media).unwrap()["type"], "media_message");
    }

    #[test]
    fn request_omits_parameters_without_tools() {
        let request = ChatRequest {
            prompt: CHAT_PROMPT,
            profile: "anthropic-claude-4-sonnet".to_string(),
            chat: Chat {
                messages: vec![ChatMessage::UserMessage {
                    content: "hello".to_string(),
                }],
            },
            parameters: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["prompt"], "ij.chat.request.new-chat-on-start");
        assert_eq!(json["chat"]["messages"][0]["type"], "user_message");
        assert!(json.get("parameters").is_none());
    }

    #[test]
    fn tool_message_round_trips() {
        let message = ChatMessage::ToolMessage {
            id: "call_1".to_string(),
            tool_name: "get_weather".to_string(),
            result: "sunny".to_string(),
        };

        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: ChatMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn parameters_entry_is_json_typed() {
        let entry = DataEntry::json("[{\"name\":\"t\"}]".to_string());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "json");
        assert_eq!(json["fqdn"], "[{\"name\":\"t\"}]");
    }
}
