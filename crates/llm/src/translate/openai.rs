use super::{TranslatedChat, Translator, canonicalize_arguments, tools_parameters};
use crate::{
    media,
    messages::openai::{
        ChatCompletionRequest, ChatMessage, ChatRole, ContentPart, MessageContent,
    },
    provider::jetbrains::input as upstream,
    tools::SanitizedTool,
};

impl Translator {
    /// Translates an OpenAI Chat Completions request into upstream messages.
    pub(crate) fn translate_openai(&mut self, request: &ChatCompletionRequest) -> TranslatedChat {
        // First pass: collect tool call ids so tool results can carry the
        // function name upstream.
        for message in &request.messages {
            for call in message.tool_calls.iter().flatten() {
                self.remember_tool(&call.id, &call.function.name);
            }
        }

        let mut messages = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            match &message.role {
                ChatRole::System => messages.push(upstream::ChatMessage::SystemMessage {
                    content: joined_text(message),
                }),

                ChatRole::Assistant => self.push_assistant(&mut messages, message),

                ChatRole::Tool => self.push_tool_result(&mut messages, message),

                // Unknown roles are treated permissively as user input.
                ChatRole::User | ChatRole::Other(_) => push_user_content(&mut messages, message),
            }
        }

        let tools = request
            .tools
            .iter()
            .flatten()
            .map(|tool| {
                SanitizedTool::new(
                    tool.function.name.clone(),
                    tool.function.description.clone(),
                    tool.function.parameters.as_ref(),
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

    fn push_assistant(&self, messages: &mut Vec<upstream::ChatMessage>, message: &ChatMessage) {
        let calls = message.tool_calls.as_deref().unwrap_or_default();

        if calls.is_empty() {
            messages.push(upstream::ChatMessage::AssistantMessageText {
                content: joined_text(message),
            });
            return;
        }

        for call in calls {
            messages.push(upstream::ChatMessage::AssistantMessageTool {
                id: call.id.clone(),
                tool_name: call.function.name.clone(),
                content: canonicalize_arguments(&call.function.arguments),
            });
        }
    }

    fn push_tool_result(&self, messages: &mut Vec<upstream::ChatMessage>, message: &ChatMessage) {
        let Some(id) = message.tool_call_id.as_deref() else {
            log::warn!("dropping tool message without tool_call_id");
            return;
        };

        let Some(tool_name) = self.resolve_tool_name(id) else {
            log::warn!("dropping tool message for unknown tool call id {id}");
            return;
        };

        messages.push(upstream::ChatMessage::ToolMessage {
            id: id.to_string(),
            tool_name: tool_name.to_string(),
            result: joined_text(message),
        });
    }
}

/// Emits one `user_message` per text part and one `media_message` per valid
/// image part. Parts are never joined; invalid images are dropped with a
/// warning so the payload degrades to text-only.
fn push_user_content(messages: &mut Vec<upstream::ChatMessage>, message: &ChatMessage) {
    match &message.content {
        Some(MessageContent::Text(text)) => messages.push(upstream::ChatMessage::UserMessage {
            content: text.clone(),
        }),

        Some(MessageContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => messages.push(upstream::ChatMessage::UserMessage {
                        content: text.clone(),
                    }),
                    ContentPart::ImageUrl { image_url } => {
                        match media::validate_data_url(&image_url.url) {
                            Ok(image) => messages.push(upstream::ChatMessage::MediaMessage {
                                media_type: image.media_type,
                                data: image.data,
                            }),
                            Err(e) => log::warn!("dropping image from user message: {e}"),
                        }
                    }
                }
            }
        }

        None => messages.push(upstream::ChatMessage::UserMessage {
            content: String::new(),
        }),
    }
}

fn joined_text(message: &ChatMessage) -> String {
    message
        .content
        .as_ref()
        .map(MessageContent::joined_text)
        .unwrap_or_default()
}
