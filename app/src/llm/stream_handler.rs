//! Stream handling for chat-completions responses.
//!
//! This module handles:
//! - Accumulating OpenAI-style streaming tool calls
//! - Extracting tool-call deltas and completion text from response payloads

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::LlmError;
use crate::protocol::ToolInvocation;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulator for OpenAI-style streaming tool calls.
///
/// In the OpenAI streaming format, tool calls arrive incrementally:
/// - First chunk contains `id`, `type`, and `function.name`
/// - Subsequent chunks contain `function.arguments` fragments
/// - Multiple tool calls are indexed by their `index` field
#[derive(Debug, Default)]
pub struct StreamingToolCalls {
    calls: BTreeMap<usize, PartialCall>,
}

impl StreamingToolCalls {
    /// Process a delta.tool_calls array from a streaming chunk
    pub fn process_delta(&mut self, tool_calls: &[Value]) {
        for tc in tool_calls {
            let index = tc["index"].as_u64().unwrap_or(0) as usize;
            let entry = self.calls.entry(index).or_default();

            if let Some(id) = tc["id"].as_str() {
                entry.id = id.to_string();
            }
            if let Some(name) = tc["function"]["name"].as_str().filter(|n| !n.is_empty()) {
                entry.name = name.to_string();
            }
            if let Some(args) = tc["function"]["arguments"].as_str() {
                entry.arguments.push_str(args);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finish accumulation, yielding invocations in index order.
    ///
    /// Entries that never received a name are dropped; empty arguments mean `{}`.
    pub fn into_invocations(self) -> Result<Vec<ToolInvocation>, LlmError> {
        let mut result = Vec::with_capacity(self.calls.len());

        for (_index, call) in self.calls {
            if call.name.is_empty() {
                tracing::warn!("Dropping streamed tool call without a name");
                continue;
            }

            let arguments = if call.arguments.trim().is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&call.arguments).map_err(|e| LlmError::MalformedToolArguments {
                    name: call.name.clone(),
                    reason: format!("{} (raw: {})", e, call.arguments),
                })?
            };

            result.push(ToolInvocation {
                name: call.name,
                arguments,
                id: if call.id.is_empty() { None } else { Some(call.id) },
            });
        }

        Ok(result)
    }
}

/// The `choices[0].delta.tool_calls` array of a streamed chunk, if any
pub fn extract_tool_call_delta(chunk: &Value) -> Option<&Vec<Value>> {
    chunk
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("tool_calls"))
        .and_then(|t| t.as_array())
        .filter(|t| !t.is_empty())
}

/// Error message carried inside a payload (`{"error": {"message": ...}}`)
pub fn extract_api_error(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    if error.is_null() {
        return None;
    }
    Some(
        error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

/// Text of the first choice of a non-streamed completion
pub fn extract_completion_text(response: &Value) -> Option<String> {
    let content = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))?;

    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }

    // Some providers return content as a list of typed parts
    let parts = content.as_array()?;
    let mut buf = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            buf.push_str(text);
        } else if let Some(text) = part.as_str() {
            buf.push_str(text);
        }
    }
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accumulates_fragments_across_chunks_in_index_order() {
        let mut calls = StreamingToolCalls::default();
        calls.process_delta(&[json!({"index": 1, "id": "call_b", "function": {"name": "create_relations", "arguments": ""}})]);
        calls.process_delta(&[json!({"index": 0, "id": "call_a", "function": {"name": "create_entities", "arguments": "{\"enti"}})]);
        calls.process_delta(&[
            json!({"index": 0, "function": {"arguments": "ties\": []}"}}),
            json!({"index": 1, "function": {"arguments": "{\"relations\": []}"}}),
        ]);

        let invocations = calls.into_invocations().unwrap();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].name, "create_entities");
        assert_eq!(invocations[0].arguments, json!({"entities": []}));
        assert_eq!(invocations[0].id.as_deref(), Some("call_a"));
        assert_eq!(invocations[1].name, "create_relations");
        assert_eq!(invocations[1].arguments, json!({"relations": []}));
    }

    #[test]
    fn empty_arguments_become_empty_object_and_nameless_calls_are_dropped() {
        let mut calls = StreamingToolCalls::default();
        calls.process_delta(&[
            json!({"index": 0, "function": {"name": "read_graph"}}),
            json!({"index": 1, "function": {"arguments": "{}"}}),
        ]);
        let invocations = calls.into_invocations().unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].arguments, json!({}));
        assert_eq!(invocations[0].id, None);
    }

    #[test]
    fn truncated_arguments_are_an_error() {
        let mut calls = StreamingToolCalls::default();
        calls.process_delta(&[json!({"index": 0, "function": {"name": "create_entities", "arguments": "{\"entities\": ["}})]);
        let err = calls.into_invocations().unwrap_err();
        assert!(matches!(err, LlmError::MalformedToolArguments { ref name, .. } if name == "create_entities"));
    }

    #[test]
    fn extract_tool_call_delta_ignores_text_only_chunks() {
        let text_chunk = json!({"choices": [{"delta": {"content": "hello"}}]});
        assert!(extract_tool_call_delta(&text_chunk).is_none());

        let empty = json!({"choices": [{"delta": {"tool_calls": []}}]});
        assert!(extract_tool_call_delta(&empty).is_none());

        let tool_chunk = json!({"choices": [{"delta": {"tool_calls": [{"index": 0}]}}]});
        assert_eq!(extract_tool_call_delta(&tool_chunk).map(|t| t.len()), Some(1));
    }

    #[test]
    fn extract_completion_text_handles_string_and_parts() {
        let plain = json!({"choices": [{"message": {"role": "assistant", "content": "An idea"}}]});
        assert_eq!(extract_completion_text(&plain).as_deref(), Some("An idea"));

        let parts = json!({"choices": [{"message": {"content": [{"type": "text", "text": "An "}, {"type": "text", "text": "idea"}]}}]});
        assert_eq!(extract_completion_text(&parts).as_deref(), Some("An idea"));

        assert!(extract_completion_text(&json!({"choices": []})).is_none());
    }

    #[test]
    fn extract_api_error_reads_message() {
        assert_eq!(
            extract_api_error(&json!({"error": {"message": "rate limited"}})).as_deref(),
            Some("rate limited")
        );
        assert!(extract_api_error(&json!({"error": null})).is_none());
        assert!(extract_api_error(&json!({"choices": []})).is_none());
    }
}
