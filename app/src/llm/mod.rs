//! Client for an OpenAI-compatible chat-completions API.
//!
//! This module provides:
//! - `LlmClient`: streamed tool-call generation and single-shot completions
//! - Request building utilities
//! - Streaming response handlers

mod request_builder;
mod stream_handler;

pub use request_builder::{
    build_completion_request_body, build_tool_call_request_body, chat_completions_url, COMPLETION_MAX_TOKENS,
    COMPLETION_TEMPERATURE,
};
pub use stream_handler::{extract_api_error, extract_completion_text, extract_tool_call_delta, StreamingToolCalls};

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::error::LlmError;
use crate::protocol::{OpenAITool, ToolInvocation};
use crate::settings::AppSettings;
use crate::sse::SseDecoder;

/// Connection details for one chat-completions endpoint
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    pub fn new(http: reqwest::Client, api_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            endpoint: chat_completions_url(api_url),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_settings(http: reqwest::Client, settings: &AppSettings) -> Self {
        Self::new(http, &settings.llm_api_url, &settings.llm_api_key, &settings.llm_model)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let mut request = self.http.post(&self.endpoint).json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("LLM API error ({}): {}", status, body);
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// Stream a tool-calling completion and assemble the requested invocations.
    ///
    /// `on_delta` receives every non-empty `delta.tool_calls` array as it
    /// arrives; the returned invocations are aggregated over the whole stream.
    /// A reply that is not an event stream, or a stream that ends before
    /// `[DONE]`, is an error.
    pub async fn stream_tool_calls<F>(
        &self,
        system_prompt: &str,
        user_text: &str,
        tools: &[OpenAITool],
        mut on_delta: F,
    ) -> Result<Vec<ToolInvocation>, LlmError>
    where
        F: FnMut(&[Value]),
    {
        let body = build_tool_call_request_body(&self.model, system_prompt, user_text, tools);
        tracing::info!(
            "Streaming tool-call request to {} (model {}, {} tools)",
            self.endpoint,
            self.model,
            tools.len()
        );

        let mut resp = self.post(&body).await?;
        if !is_event_stream(&resp) {
            let text = resp.text().await?;
            return Err(non_stream_reply_error(&text));
        }

        let mut decoder = SseDecoder::default();
        let mut calls = StreamingToolCalls::default();
        let mut done = false;

        while !done {
            let Some(chunk) = resp.chunk().await? else {
                break;
            };
            for data in decoder.push(&chunk) {
                if handle_stream_payload(&data, &mut calls, &mut on_delta)? {
                    done = true;
                    break;
                }
            }
        }
        if !done {
            for data in decoder.finish() {
                if handle_stream_payload(&data, &mut calls, &mut on_delta)? {
                    done = true;
                    break;
                }
            }
        }
        if !done {
            return Err(LlmError::MalformedStream("stream ended before [DONE]".to_string()));
        }

        if calls.is_empty() {
            tracing::warn!("LLM stream finished without any tool calls");
        }
        let invocations = calls.into_invocations()?;
        tracing::info!("LLM requested {} tool calls", invocations.len());
        Ok(invocations)
    }

    /// Single non-streamed completion of `prompt`, returning the first choice's text.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = build_completion_request_body(&self.model, prompt);
        tracing::info!("Completion request to {} (model {})", self.endpoint, self.model);

        let resp = self.post(&body).await?;
        let text = resp.text().await?;
        let json: Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::MalformedResponse(format!("{}: {}", e, text)))?;
        if let Some(message) = extract_api_error(&json) {
            return Err(LlmError::Api(message));
        }
        extract_completion_text(&json)
            .ok_or_else(|| LlmError::MalformedResponse(format!("no choices[0].message.content in {}", text)))
    }
}

fn is_event_stream(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().starts_with("text/event-stream"))
        .unwrap_or(false)
}

/// Error for a successful reply that did not stream: an API error body if it carries one
fn non_stream_reply_error(body: &str) -> LlmError {
    match serde_json::from_str::<Value>(body).ok().as_ref().and_then(extract_api_error) {
        Some(message) => LlmError::Api(message),
        None => LlmError::MalformedStream(format!("expected an event stream, got: {}", body)),
    }
}

/// Apply one SSE payload. Returns true once the `[DONE]` sentinel is seen.
fn handle_stream_payload<F>(data: &str, calls: &mut StreamingToolCalls, on_delta: &mut F) -> Result<bool, LlmError>
where
    F: FnMut(&[Value]),
{
    let data = data.trim();
    if data.is_empty() {
        return Ok(false);
    }
    if data == "[DONE]" {
        tracing::debug!("LLM stream DONE");
        return Ok(true);
    }

    let json: Value =
        serde_json::from_str(data).map_err(|e| LlmError::MalformedStream(format!("{}: {}", e, data)))?;
    if let Some(message) = extract_api_error(&json) {
        return Err(LlmError::Api(message));
    }
    if let Some(tool_calls) = extract_tool_call_delta(&json) {
        calls.process_delta(tool_calls);
        on_delta(tool_calls);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_payloads_feed_accumulator_and_callback() {
        let mut calls = StreamingToolCalls::default();
        let mut seen = Vec::new();
        let mut on_delta = |delta: &[Value]| seen.push(delta.to_vec());

        let first = json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "c1", "function": {"name": "create_entities", "arguments": ""}}]}}]});
        let second = json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{}"}}]}}]});
        let text_only = json!({"choices": [{"delta": {"content": "thinking"}}]});

        assert!(!handle_stream_payload(&first.to_string(), &mut calls, &mut on_delta).unwrap());
        assert!(!handle_stream_payload(&text_only.to_string(), &mut calls, &mut on_delta).unwrap());
        assert!(!handle_stream_payload(&second.to_string(), &mut calls, &mut on_delta).unwrap());
        assert!(handle_stream_payload("[DONE]", &mut calls, &mut on_delta).unwrap());

        assert_eq!(seen.len(), 2);
        let invocations = calls.into_invocations().unwrap();
        assert_eq!(invocations[0].name, "create_entities");
    }

    #[test]
    fn malformed_stream_payload_is_an_error() {
        let mut calls = StreamingToolCalls::default();
        let err = handle_stream_payload("{not json", &mut calls, &mut |_: &[Value]| {}).unwrap_err();
        assert!(matches!(err, LlmError::MalformedStream(_)));
    }

    #[test]
    fn error_payload_inside_stream_is_an_api_error() {
        let mut calls = StreamingToolCalls::default();
        let payload = json!({"error": {"message": "context length exceeded"}}).to_string();
        let err = handle_stream_payload(&payload, &mut calls, &mut |_: &[Value]| {}).unwrap_err();
        assert!(matches!(err, LlmError::Api(ref m) if m == "context length exceeded"));
    }

    #[test]
    fn json_reply_to_a_stream_request_is_classified() {
        let err = non_stream_reply_error(r#"{"error": {"message": "streaming not supported"}}"#);
        assert!(matches!(err, LlmError::Api(ref m) if m == "streaming not supported"));

        let completion = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]}).to_string();
        assert!(matches!(non_stream_reply_error(&completion), LlmError::MalformedStream(_)));
        assert!(matches!(non_stream_reply_error("<html>"), LlmError::MalformedStream(_)));
    }

    #[test]
    fn debug_output_hides_api_key() {
        let client = LlmClient::new(reqwest::Client::new(), "https://api.example.com/v1", "sk-secret", "gpt-4o-mini");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-secret"));
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
    }
}
