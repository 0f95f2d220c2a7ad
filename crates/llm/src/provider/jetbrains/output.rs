use serde::Deserialize;

/// One typed event of the upstream chat stream.
///
/// The upstream protocol frames events as SSE `data:` lines, each carrying a
/// JSON object tagged by `type`. A `ToolCall` arrives in two shapes: an
/// opening carrying `id` + `name`, then any number of argument fragments
/// carrying only `content`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum StreamEvent {
    /// Incremental assistant text.
    Content {
        #[serde(default)]
        content: String,
    },

    /// Tool call opening (`id` + `name`) or argument fragment (`content`).
    ToolCall {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },

    /// Legacy tool call shape without an id. Treated like [`StreamEvent::ToolCall`].
    FunctionCall {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },

    /// Carries the finish reason at the end of generation.
    FinishMetadata {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Forward-compatibility fallback for event types this gateway ignores.
    #[serde(other)]
    Unknown,
}

/// Why the upstream stopped generating, reduced to the cases the public
/// protocols distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishKind {
    /// The model invoked tools.
    ToolCall,
    /// The token limit was reached.
    Length,
    /// Everything else.
    Stop,
}

impl FinishKind {
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "tool_call" => FinishKind::ToolCall,
            "length" => FinishKind::Length,
            _ => FinishKind::Stop,
        }
    }
}

/// Classifies one SSE data payload from the upstream stream.
///
/// `[DONE]` and the bare `end` marker terminate the stream; the literal
/// `null` and blank payloads are skipped; anything else is decoded as a
/// [`StreamEvent`]. Undecodable payloads are skipped with a warning so one
/// malformed frame cannot kill an otherwise healthy stream.
pub(crate) fn classify_data(data: &str) -> Option<Frame> {
    let data = data.trim();

    if data.is_empty() || data == "null" {
        return None;
    }

    if data == "[DONE]" || data == "end" {
        return Some(Frame::Done);
    }

    match sonic_rs::from_str::<StreamEvent>(data) {
        Ok(event) => Some(Frame::Event(event)),
        Err(e) => {
            log::warn!("skipping undecodable upstream frame: {e}");
            None
        }
    }
}

/// Outcome of classifying one data payload.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A decoded stream event.
    Event(StreamEvent),
    /// The stream terminator.
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_terminators_and_noise() {
        assert!(matches!(classify_data("[DONE]"), Some(Frame::Done)));
        assert!(matches!(classify_data("end"), Some(Frame::Done)));
        assert!(matches!(classify_data(" end "), Some(Frame::Done)));
        assert!(classify_data("null").is_none());
        assert!(classify_data("").is_none());
        assert!(classify_data("   ").is_none());
        assert!(classify_data("{not json").is_none());
    }

    #[test]
    fn classify_content_event() {
        let Some(Frame::Event(StreamEvent::Content { content })) =
            classify_data(r#"{"type":"Content","content":"hello"}"#)
        else {
            unreachable!("expected content event");
        };
        assert_eq!(content, "hello");
    }

    #[test]
    fn classify_tool_call_shapes() {
        let Some(Frame::Event(StreamEvent::ToolCall { id, name, content })) =
            classify_data(r#"{"type":"ToolCall","id":"toolu_1","name":"get_weather"}"#)
        else {
            unreachable!("expected tool call opening");
        };
        assert_eq!(id.as_deref(), Some("toolu_1"));
        assert_eq!(name.as_deref(), Some("get_weather"));
        assert!(content.is_none());

        let Some(Frame::Event(StreamEvent::ToolCall { id, name, content })) =
            classify_data(r#"{"type":"ToolCall","content":"{\"city\":\"Beijing\"}"}"#)
        else {
            unreachable!("expected tool call fragment");
        };
        assert!(id.is_none());
        assert!(name.is_none());
        assert_eq!(content.as_deref(), Some("{\"city\":\"Beijing\"}"));
    }

    #[test]
    fn classify_finish_metadata() {
        let Some(Frame::Event(StreamEvent::FinishMetadata { reason })) =
            classify_data(r#"{"type":"FinishMetadata","reason":"tool_call"}"#)
        else {
            unreachable!("expected finish metadata");
        };
        assert_eq!(reason.as_deref(), Some("tool_call"));
    }

    #[test]
    fn classify_unknown_event_type() {
        assert!(matches!(
            classify_data(r#"{"type":"SomethingNew","x":1}"#),
            Some(Frame::Event(StreamEvent::Unknown))
        ));
    }

    #[test]
    fn finish_kind_mapping() {
        assert_eq!(FinishKind::from_reason("tool_call"), FinishKind::ToolCall);
        assert_eq!(FinishKind::from_reason("length"), FinishKind::Length);
        assert_eq!(FinishKind::from_reason("stop"), FinishKind::Stop);
        assert_eq!(FinishKind::from_reason("anything"), FinishKind::Stop);
    }
}
