use super::{TranslatedChat, Translator, tools_parameters};
use crate::{
    media,
    messages::anthropic::{
        AnthropicChatRequest, AnthropicContent, AnthropicMessage, AnthropicMessageContent,
        AnthropicRole, ToolResultContent,
    },
    provider::jetbrains::input as upstream,
    tools::SanitizedTool,
};

impl Translator {
    /// Translates an Anthropic Messages request into upstream messages.
    pub(crate) fn translate_anthropic(&mut self, request: &AnthropicChatRequest) -> TranslatedChat {
        // First pass: collect tool_use ids so tool_result blocks can carry
        // the tool name upstream.
        for message in &request.messages {
            if let AnthropicMessageContent::Blocks(blocks) = &message.content {
                for block in blocks {
                    if let AnthropicContent::ToolUse { id, name, .. } = block {
                        self.remember_tool(id, name);
                    }
                }
            }
        }

        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system) = &request.system {
            messages.push(upstream::ChatMessage::SystemMessage {
                content: system.joined_text(),
            });
        }

        for message in &request.messages {
            self.push_message(&mut messages, message);
        }

        let tools = request
            .tools
            .iter()
            .flatten()
            .map(|tool| {
                SanitizedTool::new(
                    tool.name.clone(),
                    tool.description.clone(),
                    Some(&tool.input_schema),
                )
            })
            .collect();

        if request.tool_choice.is_some() {
            log::debug!("tool_choice has no upstream equivalent, ignoring");
        }

        TranslatedChat {
            messages,
            parameters: tools_parameters(tools),
        }
    }

    fn push_message(&self, messages: &mut Vec<upstream::ChatMessage>, message: &AnthropicMessage) {
        match (&message.role, &message.content) {
            (AnthropicRole::User, AnthropicMessageContent::Text(text)) => {
                messages.push(upstream::ChatMessage::UserMessage {
                    content: text.clone(),
                });
            }

            (AnthropicRole::Assistant, AnthropicMessageContent::Text(text)) => {
                messages.push(upstream::ChatMessage::AssistantMessageText {
                    content: text.clone(),
                });
            }

            (AnthropicRole::User, AnthropicMessageContent::Blocks(blocks)) => {
                for block in blocks {
                    self.push_user_block(messages, block);
                }
            }

            (AnthropicRole::Assistant, AnthropicMessageContent::Blocks(blocks)) => {
                for block in blocks {
                    self.push_assistant_block(messages, block);
                }
            }
        }
    }

    fn push_user_block(&self, messages: &mut Vec<upstream::ChatMessage>, block: &AnthropicContent) {
        match block {
            AnthropicContent::Text { text } => messages.push(upstream::ChatMessage::UserMessage {
                content: text.clone(),
            }),

            AnthropicContent::Image { source } => {
                if source.source_type != "base64" {
                    log::warn!("dropping image with unsupported source type {}", source.source_type);
                    return;
                }

                match media::validate_image(&source.media_type, &source.data) {
                    Ok(image) => messages.push(upstream::ChatMessage::MediaMessage {
                        media_type: image.media_type,
                        data: image.data,
                    }),
                    Err(e) => log::warn!("dropping image from user message: {e}"),
                }
            }

            AnthropicContent::ToolResult { tool_use_id, content } => {
                let Some(tool_name) = self.resolve_tool_name(tool_use_id) else {
                    log::warn!("dropping tool_result for unknown tool_use id {tool_use_id}");
                    return;
                };

                messages.push(upstream::ChatMessage::ToolMessage {
                    id: tool_use_id.clone(),
                    tool_name: tool_name.to_string(),
                    result: content.as_ref().map(ToolResultContent::joined_text).unwrap_or_default(),
                });
            }

            AnthropicContent::ToolUse { id, .. } => {
                log::warn!("dropping tool_use block {id} found in a user message");
            }
        }
    }

    fn push_assistant_block(&self, messages: &mut Vec<upstream::ChatMessage>, block: &AnthropicContent) {
        match block {
            AnthropicContent::Text { text } => {
                messages.push(upstream::ChatMessage::AssistantMessageText {
                    content: text.clone(),
                });
            }

            AnthropicContent::ToolUse { id, name, input } => {
                messages.push(upstream::ChatMessage::AssistantMessageTool {
                    id: id.clone(),
                    tool_name: name.clone(),
                    content: input.to_string(),
                });
            }

            AnthropicContent::Image { .. } | AnthropicContent::ToolResult { .. } => {
                log::warn!("dropping content block unsupported in assistant messages");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde_json::json;

    use crate::{provider::jetbrains::input::ChatMessage as Upstream, translate::TranslatorPool};

    fn request(json: serde_json::Value) -> crate::messages::anthropic::AnthropicChatRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn system_prompt_leads_the_conversation() {
        let request = request(json!({
            "model": "m",
            "max_tokens": 64,
            "system": "be brief",
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let pool = TranslatorPool::new();
        let translated = pool.acquire().translate_anthropic(&request);

        assert_eq!(
            translated.messages,
            vec![
                Upstream::SystemMessage {
                    content: "be brief".to_string()
                },
                Upstream::UserMessage {
                    content: "hi".to_string()
                },
            ]
        );
    }

    #[test]
    fn tool_use_and_result_round_trip_through_the_id_map() {
        let request = request(json!({
            "model": "m",
            "max_tokens": 64,
            "messages": [
                {"role": "user", "content": "weather in Beijing?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "checking"},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Beijing"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"},
                    {"type": "tool_result", "tool_use_id": "toolu_missing", "content": "lost"}
                ]}
            ]
        }));

        let pool = TranslatorPool::new();
        let translated = pool.acquire().translate_anthropic(&request);

        assert_eq!(
            translated.messages,
            vec![
                Upstream::UserMessage {
                    content: "weather in Beijing?".to_string()
                },
                Upstream::AssistantMessageText {
                    content: "checking".to_string()
                },
                Upstream::AssistantMessageTool {
                    id: "toolu_1".to_string(),
                    tool_name: "get_weather".to_string(),
                    content: "{\"city\":\"Beijing\"}".to_string(),
                },
                Upstream::ToolMessage {
                    id: "toolu_1".to_string(),
                    tool_name: "get_weather".to_string(),
                    result: "sunny".to_string(),
                },
            ]
        );
    }

    #[test]
    fn base64_image_blocks_become_media_messages() {
        let payload = STANDARD.encode(vec![0u8; 512]);
        let request = request(json!({
            "model": "m",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": payload}},
                {"type": "text", "text": "what is this?"}
            ]}]
        }));

        let pool = TranslatorPool::new();
        let translated = pool.acquire().translate_anthropic(&request);

        assert_eq!(
            translated.messages,
            vec![
                Upstream::MediaMessage {
                    media_type: "image/jpeg".to_string(),
                    data: payload,
                },
                Upstream::UserMessage {
                    content: "what is this?".to_string()
                },
            ]
        );
    }

    #[test]
    fn block_tool_result_content_is_flattened() {
        let request = request(json!({
            "model": "m",
            "max_tokens": 64,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": [
                        {"type": "text", "text": "line one"},
                        {"type": "text", "text": "line two"}
                    ]}
                ]}
            ]
        }));

        let pool = TranslatorPool::new();
        let translated = pool.acquire().translate_anthropic(&request);

        assert_eq!(
            translated.messages[1],
            Upstream::ToolMessage {
                id: "toolu_1".to_string(),
                tool_name: "lookup".to_string(),
                result: "line one\nline two".to_string(),
            }
        );
    }

    #[test]
    fn anthropic_tools_are_sanitized_into_parameters() {
        let request = request(json!({
            "model": "m",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{
                "name": "get_weather",
                "description": "Get the weather",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }]
        }));

        let pool = TranslatorPool::new();
        let translated = pool.acquire().translate_anthropic(&request);

        let parameters = translated.parameters.unwrap();
        let payload: serde_json::Value = serde_json::from_str(&parameters.data[0].fqdn).unwrap();
        assert_eq!(payload[0]["name"], "get_weather");
        assert_eq!(payload[0]["parameters"]["properties"]["city"]["type"], "string");
    }
}
