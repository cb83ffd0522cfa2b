//! Request body construction for chat-completions calls.

use serde_json::{json, Value};

use crate::protocol::{ChatMessage, OpenAITool};

pub const COMPLETION_MAX_TOKENS: u32 = 2048;
pub const COMPLETION_TEMPERATURE: f64 = 0.7;

/// Resolve the chat-completions endpoint from the configured API URL.
///
/// Accepts either the full endpoint or an OpenAI-style base such as
/// `https://api.example.com/v1`.
pub fn chat_completions_url(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{}/chat/completions", trimmed)
    }
}

/// Streamed request that asks the model to answer with tool calls
pub fn build_tool_call_request_body(
    model: &str,
    system_prompt: &str,
    user_text: &str,
    tools: &[OpenAITool],
) -> Value {
    let messages = [ChatMessage::system(system_prompt), ChatMessage::user(user_text)];
    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });
    if !tools.is_empty() {
        body["tools"] = json!(tools);
        body["tool_choice"] = json!("auto");
    }
    body
}

/// Single-shot, non-streamed completion of a user prompt
pub fn build_completion_request_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [ChatMessage::user(prompt)],
        "stream": false,
        "max_tokens": COMPLETION_MAX_TOKENS,
        "temperature": COMPLETION_TEMPERATURE,
    })
}
