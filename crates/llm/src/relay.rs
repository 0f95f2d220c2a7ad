//! Streaming relays: upstream chat events in, public protocol events out.
//!
//! Each relay is an explicit state machine driven one upstream event at a
//! time. The Anthropic relay owns the hard part, interleaving text and
//! `tool_use` content blocks under the protocol's bracketing rules; the
//! OpenAI relay is a flat chunk emitter. Both also back the non-streaming
//! paths through their accumulator types.

pub(crate) mod anthropic;
pub(crate) mod openai;
