//! Normalization of JSON-Schema tool definitions before they ride upstream.

use serde::Serialize;
use serde_json::{Map, Value, json};

/// Schema subtrees nested deeper than this are replaced with an open schema.
const MAX_SCHEMA_DEPTH: usize = 10;

/// Objects keep at most this many entries.
const MAX_SCHEMA_PROPERTIES: usize = 100;

/// A tool definition in the shape the upstream parameters payload carries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct SanitizedTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

impl SanitizedTool {
    pub fn new(name: String, description: Option<String>, parameters: Option<&Value>) -> Self {
        Self {
            name,
            description,
            parameters: sanitize_schema(parameters.unwrap_or(&Value::Null)),
        }
    }
}

/// Serializes a tool list into the upstream `parameters.data` payload string.
pub(crate) fn encode_tools(tools: &[SanitizedTool]) -> String {
    serde_json::to_string(tools).unwrap_or_else(|e| {
        log::error!("Failed to serialize sanitized tools: {e}");
        "[]".to_string()
    })
}

/// Normalizes a JSON-Schema value: guarantees an object root, caps nesting
/// depth and per-object property count. Oversized subtrees are pruned, never
/// a request failure.
pub(crate) fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(_) => clamp(schema, 0),
        _ => json!({ "type": "object", "properties": {} }),
    }
}

fn clamp(value: &Value, depth: usize) -> Value {
    match value {
        Value::Object(map) => {
            if depth >= MAX_SCHEMA_DEPTH {
                return json!({});
            }

            if map.len() > MAX_SCHEMA_PROPERTIES {
                log::warn!(
                    "tool schema object holds {} entries, keeping the first {MAX_SCHEMA_PROPERTIES}",
                    map.len()
                );
            }

            let clamped: Map<String, Value> = map
                .iter()
                .take(MAX_SCHEMA_PROPERTIES)
                .map(|(key, nested)| (key.clone(), clamp(nested, depth + 1)))
                .collect();

            Value::Object(clamped)
        }
        Value::Array(items) => {
            if depth >= MAX_SCHEMA_DEPTH {
                return json!([]);
            }

            Value::Array(items.iter().map(|item| clamp(item, depth + 1)).collect())
        }
        scalar => scalar.clone(),
    }
}
