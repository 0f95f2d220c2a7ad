//! Response identifier generation.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

fn nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Unix timestamp in seconds, used in `created` fields.
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// OpenAI-style completion id.
pub(crate) fn chat_completion_id() -> String {
    format!("chatcmpl-{}", nanos())
}

/// Anthropic-style message id.
pub(crate) fn message_id() -> String {
    format!("msg_{}", nanos())
}

/// Tool-use id: `toolu_` plus 20 hex characters.
pub(crate) fn tool_use_id() -> String {
    let bytes: [u8; 10] = rand::rng().random();

    let mut id = String::with_capacity(26);
    id.push_str("toolu_");
    for byte in bytes {
        id.push_str(&format!("{byte:02x}"));
    }

    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_formats() {
        assert!(chat_completion_id().starts_with("chatcmpl-"));
        assert!(message_id().starts_with("msg_"));

        let tool_id = tool_use_id();
        assert_eq!(tool_id.len(), "toolu_".len() + 20);
        assert!(tool_id["toolu_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
