//! Byte-length token approximation.
//!
//! The upstream stream carries no usage figures, so responses approximate
//! token counts as `len(text) / 4`. Kept for compatibility with existing
//! clients that chart these numbers.

use crate::provider::jetbrains::input::ChatMessage;

/// Approximate token count of a text.
pub(crate) fn approximate_tokens(text_len: usize) -> u32 {
    (text_len / 4) as u32
}

/// Approximate prompt token count of a translated conversation.
pub(crate) fn prompt_tokens(messages: &[ChatMessage]) -> u32 {
    let total: usize = messages
        .iter()
        .map(|message| match message {
            ChatMessage::UserMessage { content }
            | ChatMessage::SystemMessage { content }
            | ChatMessage::AssistantMessage { content }
            | ChatMessage::AssistantMessageText { content } => content.len(),
            ChatMessage::AssistantMessageTool { content, tool_name, .. } => {
                content.len() + tool_name.len()
            }
            ChatMessage::ToolMessage { result, tool_name, .. } => result.len() + tool_name.len(),
            // Images are opaque to the approximation.
            ChatMessage::MediaMessage { .. } => 0,
        })
        .sum();

    approximate_tokens(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_bytes_per_token() {
        assert_eq!(approximate_tokens(0), 0);
        assert_eq!(approximate_tokens(3), 0);
        assert_eq!(approximate_tokens(4), 1);
        assert_eq!(approximate_tokens(1024), 256);
    }

    #[test]
    fn prompt_tokens_sum_text_lengths() {
        let messages = vec![
            ChatMessage::SystemMessage {
                content: "abcd".to_string(),
            },
            ChatMessage::UserMessage {
                content: "efgh".to_string(),
            },
            ChatMessage::MediaMessage {
                media_type: "image/png".to_string(),
                data: "AAAA".repeat(100),
            },
        ];

        assert_eq!(prompt_tokens(&messages), 2);
    }
}
