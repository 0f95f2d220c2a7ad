use serde_json::{Value, json};

use crate::{
    ids,
    messages::anthropic::{
        AnthropicContent, AnthropicContentDelta, AnthropicDeltaUsage, AnthropicMessageDelta,
        AnthropicRole, AnthropicStopReason, AnthropicStreamEvent, AnthropicStreamMessageStart,
        AnthropicUsage,
    },
    provider::jetbrains::output::{FinishKind, StreamEvent},
    token_counter,
};

/// State machine translating the upstream event stream into the Anthropic
/// SSE event sequence.
///
/// Emission invariants:
/// 1. exactly one `message_start` first and one `message_stop` last;
/// 2. every `content_block_start` is paired with a `content_block_stop`
///    carrying the same index;
/// 3. text and tool blocks never nest;
/// 4. block indices are dense and monotonic from 0.
///
/// A tool block's `content_block_start` is deferred until its arguments have
/// fully arrived so `input` can be emitted whole. Its index is still
/// allocated the moment the tool opens, which is what yields the 0/1/2
/// numbering of a text-tool-text stream.
pub(crate) struct AnthropicRelay {
    message_id: String,
    model: String,
    input_tokens: u32,
    next_index: u32,
    text_block: Option<u32>,
    tool: Option<ToolState>,
    stop_reason: Option<AnthropicStopReason>,
    emitted_text: bool,
    started_tool: bool,
    output_len: usize,
}

struct ToolState {
    id: String,
    name: String,
    index: u32,
    raw_args: String,
}

impl AnthropicRelay {
    pub fn new(model: String, input_tokens: u32) -> Self {
        Self {
            message_id: ids::message_id(),
            model,
            input_tokens,
            next_index: 0,
            text_block: None,
            tool: None,
            stop_reason: None,
            emitted_text: false,
            started_tool: false,
            output_len: 0,
        }
    }

    /// The opening `message_start` event.
    pub fn begin(&self) -> AnthropicStreamEvent {
        AnthropicStreamEvent::MessageStart {
            message: AnthropicStreamMessageStart {
                id: self.message_id.clone(),
                message_type: "message".to_string(),
                role: AnthropicRole::Assistant,
                content: vec![],
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage {
                    input_tokens: self.input_tokens,
                    output_tokens: 0,
                },
            },
        }
    }

    /// Feeds one upstream event, returning the events to emit for it.
    pub fn on_event(&mut self, event: &StreamEvent) -> Vec<AnthropicStreamEvent> {
        let mut out = Vec::new();

        match event {
            StreamEvent::Content { content } => {
                if content.is_empty() {
                    return out;
                }

                self.flush_current_tool(&mut out);
                self.start_text_block(&mut out);

                self.output_len += content.len();
                self.emitted_text = true;

                // start_text_block guarantees an open block.
                if let Some(index) = self.text_block {
                    out.push(AnthropicStreamEvent::ContentBlockDelta {
                        index,
                        delta: AnthropicContentDelta::TextDelta {
                            text: content.clone(),
                        },
                    });
                }
            }

            StreamEvent::ToolCall { id, name, content } => {
                if let (Some(id), Some(name)) = (id, name) {
                    self.start_tool_block(&mut out, id.clone(), name.clone());
                }

                if let Some(content) = content {
                    self.append_tool_args(content);
                }
            }

            StreamEvent::FunctionCall { name, content } => {
                // Legacy shape without an id; synthesize one.
                if let Some(name) = name {
                    self.start_tool_block(&mut out, ids::tool_use_id(), name.clone());
                }

                if let Some(content) = content {
                    self.append_tool_args(content);
                }
            }

            StreamEvent::FinishMetadata { reason } => {
                self.flush_current_tool(&mut out);

                if let Some(reason) = reason {
                    self.stop_reason = Some(map_stop_reason(FinishKind::from_reason(reason)));
                }
            }

            StreamEvent::Unknown => {}
        }

        out
    }

    /// Ends the response: flushes any pending tool, closes the open text
    /// block, and emits `message_delta` + `message_stop`.
    pub fn finish(&mut self) -> Vec<AnthropicStreamEvent> {
        let mut out = Vec::new();

        self.flush_current_tool(&mut out);
        self.close_text_block(&mut out);

        out.push(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDelta {
                stop_reason: Some(self.stop_reason.clone().unwrap_or(AnthropicStopReason::EndTurn)),
                stop_sequence: None,
            },
            usage: AnthropicDeltaUsage {
                output_tokens: token_counter::approximate_tokens(self.output_len),
            },
        });
        out.push(AnthropicStreamEvent::MessageStop);

        out
    }

    /// Whether the response produced any content worth calling a success.
    pub fn succeeded(&self) -> bool {
        self.emitted_text || self.started_tool
    }

    fn alloc_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn start_text_block(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.text_block.is_some() {
            return;
        }

        let index = self.alloc_index();
        self.text_block = Some(index);

        out.push(AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: AnthropicContent::Text { text: String::new() },
        });
    }

    fn close_text_block(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if let Some(index) = self.text_block.take() {
            out.push(AnthropicStreamEvent::ContentBlockStop { index });
        }
    }

    /// Opens a new tool, flushing any previous one. The block index is
    /// allocated now; the start event waits for the arguments.
    fn start_tool_block(&mut self, out: &mut Vec<AnthropicStreamEvent>, id: String, name: String) {
        self.flush_current_tool(out);

        let index = self.alloc_index();
        self.tool = Some(ToolState {
            id,
            name,
            index,
            raw_args: String::new(),
        });
    }

    fn append_tool_args(&mut self, fragment: &str) {
        match self.tool.as_mut() {
            Some(tool) => tool.raw_args.push_str(fragment),
            None => log::debug!("dropping tool argument fragment with no open tool call"),
        }
    }

    /// Emits the deferred `content_block_start`/`content_block_stop` pair for
    /// the pending tool, closing the open text block first so blocks never
    /// nest.
    fn flush_current_tool(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        let Some(tool) = self.tool.take() else {
            return;
        };

        self.close_text_block(out);

        self.output_len += tool.raw_args.len();
        let input = parse_tool_input(&tool.raw_args);

        out.push(AnthropicStreamEvent::ContentBlockStart {
            index: tool.index,
            content_block: AnthropicContent::ToolUse {
                id: tool.id,
                name: tool.name,
                input,
            },
        });
        out.push(AnthropicStreamEvent::ContentBlockStop { index: tool.index });

        self.started_tool = true;
    }
}

/// Aggregates the upstream stream into a complete content-block list for the
/// non-streaming path. Mirrors the relay's interleaving rules without the
/// event bracketing.
pub(crate) struct MessageAccumulator {
    blocks: Vec<AnthropicContent>,
    tool: Option<PendingTool>,
    stop_reason: Option<AnthropicStopReason>,
    output_len: usize,
}

struct PendingTool {
    id: String,
    name: String,
    raw_args: String,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            tool: None,
            stop_reason: None,
            output_len: 0,
        }
    }

    pub fn on_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Content { content } => {
                if content.is_empty() {
                    return;
                }

                self.flush_tool();
                self.output_len += content.len();

                if let Some(AnthropicContent::Text { text }) = self.blocks.last_mut() {
                    text.push_str(content);
                } else {
                    self.blocks.push(AnthropicContent::Text {
                        text: content.clone(),
                    });
                }
            }

            StreamEvent::ToolCall { id, name, content } => {
                if let (Some(id), Some(name)) = (id, name) {
                    self.flush_tool();
                    self.tool = Some(PendingTool {
                        id: id.clone(),
                        name: name.clone(),
                        raw_args: String::new(),
                    });
                }

                if let (Some(content), Some(tool)) = (content, self.tool.as_mut()) {
                    tool.raw_args.push_str(content);
                }
            }

            StreamEvent::FunctionCall { name, content } => {
                if let Some(name) = name {
                    self.flush_tool();
                    self.tool = Some(PendingTool {
                        id: ids::tool_use_id(),
                        name: name.clone(),
                        raw_args: String::new(),
                    });
                }

                if let (Some(content), Some(tool)) = (content, self.tool.as_mut()) {
                    tool.raw_args.push_str(content);
                }
            }

            StreamEvent::FinishMetadata { reason } => {
                self.flush_tool();

                if let Some(reason) = reason {
                    self.stop_reason = Some(map_stop_reason(FinishKind::from_reason(reason)));
                }
            }

            StreamEvent::Unknown => {}
        }
    }

    pub fn finish(mut self) -> AccumulatedMessage {
        self.flush_tool();

        AccumulatedMessage {
            blocks: self.blocks,
            stop_reason: self.stop_reason.unwrap_or(AnthropicStopReason::EndTurn),
            output_len: self.output_len,
        }
    }

    fn flush_tool(&mut self) {
        if let Some(tool) = self.tool.take() {
            self.output_len += tool.raw_args.len();
            self.blocks.push(AnthropicContent::ToolUse {
                id: tool.id,
                name: tool.name,
                input: parse_tool_input(&tool.raw_args),
            });
        }
    }
}

/// Output of [`MessageAccumulator::finish`].
pub(crate) struct AccumulatedMessage {
    pub blocks: Vec<AnthropicContent>,
    pub stop_reason: AnthropicStopReason,
    pub output_len: usize,
}

fn map_stop_reason(kind: FinishKind) -> AnthropicStopReason {
    match kind {
        FinishKind::ToolCall => AnthropicStopReason::ToolUse,
        FinishKind::Length => AnthropicStopReason::MaxTokens,
        FinishKind::Stop => AnthropicStopReason::EndTurn,
    }
}

/// Parses aggregated tool arguments. Empty input becomes `{}`; unparseable
/// input is preserved under an `arguments` key rather than dropped.
fn parse_tool_input(raw: &str) -> Value {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return json!({});
    }

    match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => json!({ "arguments": trimmed }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn content(text: &str) -> StreamEvent {
        StreamEvent::Content {
            content: text.to_string(),
        }
    }

    fn tool_open(id: &str, name: &str) -> StreamEvent {
        StreamEvent::ToolCall {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            content: None,
        }
    }

    fn tool_args(fragment: &str) -> StreamEvent {
        StreamEvent::ToolCall {
            id: None,
            name: None,
            content: Some(fragment.to_string()),
        }
    }

    fn finish_metadata(reason: &str) -> StreamEvent {
        StreamEvent::FinishMetadata {
            reason: Some(reason.to_string()),
        }
    }

    fn run(events: &[StreamEvent]) -> (Vec<AnthropicStreamEvent>, bool) {
        let mut relay = AnthropicRelay::new("claude-4-sonnet".to_string(), 10);
        let mut out = vec![relay.begin()];

        for event in events {
            out.extend(relay.on_event(event));
        }
        out.extend(relay.finish());

        (out, relay.succeeded())
    }

    /// Checks invariants 1–4: bracketing, pairing, density, monotonicity.
    fn assert_well_formed(events: &[AnthropicStreamEvent]) {
        assert!(matches!(events.first(), Some(AnthropicStreamEvent::MessageStart { .. })));
        assert!(matches!(events.last(), Some(AnthropicStreamEvent::MessageStop)));

        let mut open: Option<u32> = None;
        let mut starts = Vec::new();
        let mut stops = HashMap::new();

        for event in events {
            match event {
                AnthropicStreamEvent::ContentBlockStart { index, .. } => {
                    assert!(open.is_none(), "blocks must not nest");
                    open = Some(*index);
                    starts.push(*index);
                }
                AnthropicStreamEvent::ContentBlockStop { index } => {
                    assert_eq!(open, Some(*index), "stop must match the open block");
                    open = None;
                    *stops.entry(*index).or_insert(0) += 1;
                }
                AnthropicStreamEvent::ContentBlockDelta { index, .. } => {
                    assert_eq!(open, Some(*index), "delta outside its block");
                }
                _ => {}
            }
        }

        assert!(open.is_none(), "all blocks must be closed");

        for (position, index) in starts.iter().enumerate() {
            assert_eq!(*index, position as u32, "indices must be dense from 0");
            assert_eq!(stops[index], 1, "exactly one stop per start");
        }
    }

    #[test]
    fn tool_only_stream_emits_single_block() {
        let (events, succeeded) = run(&[
            tool_open("toolu_only", "get_weather"),
            tool_args("{\"city\":\"Beijing\"}"),
            finish_metadata("tool_call"),
        ]);

        assert_well_formed(&events);
        assert!(succeeded);

        let AnthropicStreamEvent::ContentBlockStart { index, content_block } = &events[1] else {
            unreachable!("expected tool block start right after message_start");
        };
        assert_eq!(*index, 0);

        let AnthropicContent::ToolUse { id, name, input } = content_block else {
            unreachable!("expected tool_use block");
        };
        assert_eq!(id, "toolu_only");
        assert_eq!(name, "get_weather");
        assert_eq!(input, &json!({"city": "Beijing"}));

        assert!(matches!(
            events[2],
            AnthropicStreamEvent::ContentBlockStop { index: 0 }
        ));

        let AnthropicStreamEvent::MessageDelta { delta, .. } = &events[3] else {
            unreachable!("expected message_delta before message_stop");
        };
        assert_eq!(delta.stop_reason, Some(AnthropicStopReason::ToolUse));
    }

    #[test]
    fn text_tool_text_yields_three_blocks() {
        let (events, succeeded) = run(&[
            content("hello"),
            tool_open("toolu_mid", "get_weather"),
            tool_args("{\"city\":\"Beijing\"}"),
            content("world"),
            finish_metadata("stop"),
        ]);

        assert_well_formed(&events);
        assert!(succeeded);

        let starts: Vec<(u32, bool)> = events
            .iter()
            .filter_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                    Some((*index, matches!(content_block, AnthropicContent::ToolUse { .. })))
                }
                _ => None,
            })
            .collect();

        assert_eq!(starts, vec![(0, false), (1, true), (2, false)]);

        let deltas: Vec<(u32, String)> = events
            .iter()
            .filter_map(|event| match event {
                AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicContentDelta::TextDelta { text },
                } => Some((*index, text.clone())),
                _ => None,
            })
            .collect();

        assert_eq!(deltas, vec![(0, "hello".to_string()), (2, "world".to_string())]);
    }

    #[test]
    fn consecutive_tools_each_get_a_block() {
        let (events, _) = run(&[
            tool_open("toolu_1", "first"),
            tool_args("{}"),
            tool_open("toolu_2", "second"),
            tool_args("{\"a\":1}"),
            finish_metadata("tool_call"),
        ]);

        assert_well_formed(&events);

        let tools: Vec<(u32, String)> = events
            .iter()
            .filter_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicContent::ToolUse { name, .. },
                } => Some((*index, name.clone())),
                _ => None,
            })
            .collect();

        assert_eq!(tools, vec![(0, "first".to_string()), (1, "second".to_string())]);
    }

    #[test]
    fn empty_tool_arguments_become_empty_object() {
        let (events, _) = run(&[tool_open("toolu_1", "noop"), finish_metadata("tool_call")]);

        let input = events
            .iter()
            .find_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    content_block: AnthropicContent::ToolUse { input, .. },
                    ..
                } => Some(input.clone()),
                _ => None,
            })
            .unwrap();

        assert_eq!(input, json!({}));
    }

    #[test]
    fn unparseable_tool_arguments_are_wrapped() {
        let (events, _) = run(&[
            tool_open("toolu_1", "broken"),
            tool_args("{not json"),
            finish_metadata("tool_call"),
        ]);

        let input = events
            .iter()
            .find_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    content_block: AnthropicContent::ToolUse { input, .. },
                    ..
                } => Some(input.clone()),
                _ => None,
            })
            .unwrap();

        assert_eq!(input, json!({"arguments": "{not json"}));
    }

    #[test]
    fn empty_stream_records_failure() {
        let (events, succeeded) = run(&[]);

        assert_well_formed(&events);
        assert!(!succeeded);

        // message_start, message_delta, message_stop and nothing else.
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn legacy_function_call_opens_a_tool_block() {
        let (events, succeeded) = run(&[
            StreamEvent::FunctionCall {
                name: Some("legacy_tool".to_string()),
                content: None,
            },
            StreamEvent::FunctionCall {
                name: None,
                content: Some("{\"x\":1}".to_string()),
            },
            finish_metadata("tool_call"),
        ]);

        assert_well_formed(&events);
        assert!(succeeded);

        let (id, input) = events
            .iter()
            .find_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    content_block: AnthropicContent::ToolUse { id, input, .. },
                    ..
                } => Some((id.clone(), input.clone())),
                _ => None,
            })
            .unwrap();

        assert!(id.starts_with("toolu_"));
        assert_eq!(input, json!({"x": 1}));
    }

    #[test]
    fn accumulator_merges_adjacent_text() {
        let mut accumulator = MessageAccumulator::new();
        for event in [
            content("hel"),
            content("lo"),
            tool_open("toolu_1", "get_weather"),
            tool_args("{\"city\":\"Beijing\"}"),
            content("done"),
            finish_metadata("stop"),
        ] {
            accumulator.on_event(&event);
        }

        let message = accumulator.finish();

        assert_eq!(message.blocks.len(), 3);
        assert!(matches!(&message.blocks[0], AnthropicContent::Text { text } if text == "hello"));
        assert!(matches!(&message.blocks[1], AnthropicContent::ToolUse { name, .. } if name == "get_weather"));
        assert!(matches!(&message.blocks[2], AnthropicContent::Text { text } if text == "done"));
        assert_eq!(message.stop_reason, AnthropicStopReason::EndTurn);
    }

    #[test]
    fn accumulator_maps_tool_call_stop_reason() {
        let mut accumulator = MessageAccumulator::new();
        for event in [
            tool_open("toolu_1", "get_weather"),
            tool_args("{}"),
            finish_metadata("tool_call"),
        ] {
            accumulator.on_event(&event);
        }

        let message = accumulator.finish();
        assert_eq!(message.stop_reason, AnthropicStopReason::ToolUse);
    }
}
