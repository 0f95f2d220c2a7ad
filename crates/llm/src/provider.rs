//! Upstream vendor client.
//!
//! The gateway speaks to exactly one backend, the JetBrains AI platform;
//! its wire vocabulary and HTTP plumbing live here.

pub(crate) mod jetbrains;

use std::pin::Pin;

use futures::Stream;

use crate::error::LlmError;

/// Decoded upstream chat event stream.
pub(crate) type EventStream =
    Pin<Box<dyn Stream<Item = Result<jetbrains::output::StreamEvent, LlmError>> + Send>>;
