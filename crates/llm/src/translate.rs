//! Translation of public protocol requests into the upstream vocabulary.
//!
//! Translation is a two-pass affair: the first pass builds a map from tool
//! call ids to function names (the upstream protocol requires the name on
//! tool-result messages), the second pass emits upstream messages. The
//! stateful [`Translator`] holding that map is pooled in a free list; the
//! map is cleared but keeps its capacity when the translator is returned.

pub(crate) mod anthropic;
pub(crate) mod openai;

use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::{Mutex, PoisonError},
};

use crate::provider::jetbrains::input::{CHAT_PROMPT, Chat, ChatParameters, ChatRequest, DataEntry};

/// Upper bound on idle translators retained by the pool.
const MAX_POOLED: usize = 32;

/// Output of one translation call.
#[derive(Debug)]
pub(crate) struct TranslatedChat {
    pub messages: Vec<crate::provider::jetbrains::input::ChatMessage>,
    pub parameters: Option<ChatParameters>,
}

impl TranslatedChat {
    /// Assembles the upstream request for the given profile.
    pub fn into_request(self, profile: String) -> ChatRequest {
        ChatRequest {
            prompt: CHAT_PROMPT,
            profile,
            chat: Chat {
                messages: self.messages,
            },
            parameters: self.parameters,
        }
    }
}

/// Short-lived stateful translator. The id map is scoped to a single
/// translation call and never shared across requests.
pub(crate) struct Translator {
    tool_names: HashMap<String, String>,
}

impl Translator {
    fn new() -> Self {
        Self {
            tool_names: HashMap::new(),
        }
    }

    /// Clears per-request state, retaining map capacity.
    fn reset(&mut self) {
        self.tool_names.clear();
    }

    fn resolve_tool_name(&self, id: &str) -> Option<&str> {
        self.tool_names.get(id).map(String::as_str)
    }

    fn remember_tool(&mut self, id: &str, name: &str) {
        self.tool_names.insert(id.to_string(), name.to_string());
    }
}

fn tools_parameters(tools: Vec<crate::tools::SanitizedTool>) -> Option<ChatParameters> {
    if tools.is_empty() {
        return None;
    }

    Some(ChatParameters {
        data: vec![DataEntry::json(crate::tools::encode_tools(&tools))],
    })
}

/// Canonicalizes a JSON arguments string by re-parsing and re-serializing.
/// Unparseable input passes through verbatim.
fn canonicalize_arguments(arguments: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| arguments.to_string()),
        Err(_) => arguments.to_string(),
    }
}

/// Free list of translators shared by all requests.
pub(crate) struct TranslatorPool {
    free: Mutex<Vec<Translator>>,
}

impl TranslatorPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Takes a translator from the free list, or allocates a fresh one.
    pub fn acquire(&self) -> PooledTranslator<'_> {
        let translator = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(Translator::new);

        PooledTranslator {
            pool: self,
            translator: Some(translator),
        }
    }

    fn release(&self, mut translator: Translator) {
        translator.reset();

        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < MAX_POOLED {
            free.push(translator);
        }
    }
}

/// RAII handle returning the translator to its pool on drop.
pub(crate) struct PooledTranslator<'a> {
    pool: &'a TranslatorPool,
    translator: Option<Translator>,
}

impl Deref for PooledTranslator<'_> {
    type Target = Translator;

    fn deref(&self) -> &Translator {
        self.translator.as_ref().expect("translator taken before drop")
    }
}

impl DerefMut for PooledTranslator<'_> {
    fn deref_mut(&mut self) -> &mut Translator {
        self.translator.as_mut().expect("translator taken before drop")
    }
}

impl Drop for PooledTranslator<'_> {
    fn drop(&mut self) {
        if let Some(translator) = self.translator.take() {
            self.pool.release(translator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_normalizes_whitespace() {
        assert_eq!(
            canonicalize_arguments("{ \"city\" :  \"Beijing\" }"),
            "{\"city\":\"Beijing\"}"
        );
    }

    #[test]
    fn canonicalize_passes_invalid_json_verbatim() {
        assert_eq!(canonicalize_arguments("{broken"), "{broken");
        assert_eq!(canonicalize_arguments(""), "");
    }

    #[test]
    fn pool_reuses_translators_with_cleared_state() {
        let pool = TranslatorPool::new();

        {
            let mut translator = pool.acquire();
            translator.remember_tool("call_1", "get_weather");
            assert_eq!(translator.resolve_tool_name("call_1"), Some("get_weather"));
        }

        let translator = pool.acquire();
        assert_eq!(translator.resolve_tool_name("call_1"), None);
        assert_eq!(pool.free.lock().unwrap().len(), 0);
    }
}
