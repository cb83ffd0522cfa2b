//! Discovery sessions against an MCP tool server over HTTP.
//!
//! A session is opened with `initialize`, caches the server's tool and
//! system-prompt catalog, executes `tools/call` requests, and must be closed
//! explicitly to release the server-side session.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::McpError;
use crate::protocol::{OpenAITool, ServerStatus, SystemPrompt};
use crate::sse::SseDecoder;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "mcp-session-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// MCP JSON-RPC request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// MCP JSON-RPC response
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct JsonRpcResponse {
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// MCP Tool definition from tools/list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    pub input_schema: Option<Value>,
}

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl McpToolResult {
    /// Text of the first text content block, where knowledge tools put their JSON
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| c.text.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl McpContent {
    pub fn text(text: &str) -> Self {
        Self {
            content_type: "text".to_string(),
            text: Some(text.to_string()),
            data: None,
            mime_type: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl std::fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// An open discovery session with its cached catalog
pub struct McpSession {
    http: reqwest::Client,
    url: String,
    session_id: Option<String>,
    request_id: u64,
    server_info: ServerInfo,
    tools: Vec<McpTool>,
    prompts: Vec<SystemPrompt>,
}

impl McpSession {
    /// Connect to `url`, run the initialize handshake and fetch tools and prompts.
    pub async fn open(http: &reqwest::Client, url: &str) -> Result<Self, McpError> {
        tracing::info!("Opening MCP session at {}", url);
        let mut session = Self {
            http: http.clone(),
            url: url.to_string(),
            session_id: None,
            request_id: 0,
            server_info: ServerInfo::default(),
            tools: Vec::new(),
            prompts: Vec::new(),
        };

        match session.handshake().await {
            Ok(()) => {
                tracing::info!(
                    "MCP session open: {} ({} tools, {} system prompts)",
                    session.server_info,
                    session.tools.len(),
                    session.prompts.len()
                );
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("MCP session at {} failed to open: {}", url, e);
                session.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), McpError> {
        let init = self
            .send_request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mcp-notes",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;

        if let Some(info) = init.get("serverInfo") {
            self.server_info = serde_json::from_value(info.clone()).unwrap_or_default();
        }

        if let Err(e) = self.send_notification("notifications/initialized", None).await {
            tracing::warn!("Failed to send initialized notification: {}", e);
        }

        self.tools = self.list_tools().await?;
        for tool in &self.tools {
            tracing::debug!(
                "  - {}: {}",
                tool.name,
                tool.description.as_deref().unwrap_or("(no description)")
            );
        }

        let serves_prompts = init
            .get("capabilities")
            .and_then(|c| c.get("prompts"))
            .is_some();
        if serves_prompts {
            self.prompts = match self.list_prompts().await {
                Ok(prompts) => prompts,
                Err(e) if e.is_method_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };
        }

        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        self.request_id += 1;
        self.request_id
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .timeout(REQUEST_TIMEOUT)
            .json(message);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// Send a request and wait for the response with the matching id
    async fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.to_string(),
            params,
        };
        tracing::debug!("MCP -> {} (id {})", method, id);

        let resp = self.post(&request).await?;
        if method == "initialize" {
            if let Some(session_id) = resp.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
                self.session_id = Some(session_id.to_string());
            }
        }

        let response = read_response(resp, id).await?;
        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("No result in response to {}", method)))
    }

    /// Send a notification (no response expected)
    async fn send_notification(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method: method.to_string(),
            params,
        };
        tracing::debug!("MCP -> notification {}", method);
        self.post(&notification).await.map(|_| ())
    }

    async fn list_tools(&mut self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page = self.send_request("tools/list", params).await?;
            if let Some(items) = page.get("tools").and_then(|t| t.as_array()) {
                tools.extend(items.iter().filter_map(|t| serde_json::from_value::<McpTool>(t.clone()).ok()));
            }
            cursor = page.get("nextCursor").and_then(|c| c.as_str()).map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }
        Ok(tools)
    }

    async fn list_prompts(&mut self) -> Result<Vec<SystemPrompt>, McpError> {
        let listing = self.send_request("prompts/list", None).await?;
        let names: Vec<String> = listing
            .get("prompts")
            .and_then(|p| p.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| p.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut prompts = Vec::with_capacity(names.len());
        for name in names {
            let prompt = self
                .send_request("prompts/get", Some(json!({ "name": name, "arguments": {} })))
                .await?;
            prompts.push(SystemPrompt {
                content: prompt_text(&prompt),
                name,
            });
        }
        Ok(prompts)
    }

    /// Execute a tool on the server
    pub async fn call_tool(&mut self, tool_name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        tracing::info!("Calling tool {}", tool_name);
        tracing::debug!(
            "Tool {} arguments: {}",
            tool_name,
            serde_json::to_string(&arguments).unwrap_or_default()
        );

        let raw = self
            .send_request("tools/call", Some(json!({ "name": tool_name, "arguments": arguments })))
            .await?;
        let result: McpToolResult = serde_json::from_value(raw)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tool result: {}", e)))?;

        if result.is_error {
            tracing::warn!("Tool {} reported an error: {}", tool_name, result.first_text().unwrap_or(""));
        }
        Ok(result)
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    pub fn prompts(&self) -> &[SystemPrompt] {
        &self.prompts
    }

    pub fn find_tool(&self, name: &str) -> Option<&McpTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn find_prompt(&self, name: &str) -> Option<&SystemPrompt> {
        self.prompts.iter().find(|p| p.name == name)
    }

    /// Function-call schemas for the named tools that the server actually offers
    pub fn tool_schemas(&self, names: &[&str]) -> Vec<OpenAITool> {
        self.tools
            .iter()
            .filter(|t| names.contains(&t.name.as_str()))
            .map(OpenAITool::from_mcp)
            .collect()
    }

    /// End the session. Failures are logged; the connection is released either way.
    pub async fn close(self) {
        let Some(session_id) = &self.session_id else {
            tracing::debug!("MCP session at {} closed", self.url);
            return;
        };
        let result = self
            .http
            .delete(&self.url)
            .header(SESSION_HEADER, session_id)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => tracing::debug!("MCP session {} closed", session_id),
            Ok(resp) => tracing::debug!("MCP session {} close answered {}", session_id, resp.status()),
            Err(e) => tracing::warn!("Failed to close MCP session {}: {}", session_id, e),
        }
    }
}

/// Read a JSON-RPC response from either a JSON body or an event stream
async fn read_response(mut resp: reqwest::Response, expected_id: u64) -> Result<JsonRpcResponse, McpError> {
    let is_stream = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/event-stream"))
        .unwrap_or(false);

    if !is_stream {
        let body = resp.text().await?;
        return match_response(&body, expected_id).ok_or_else(|| {
            McpError::Protocol(format!("Unexpected response for request {}: {}", expected_id, body))
        });
    }

    let mut decoder = SseDecoder::default();
    while let Some(chunk) = resp.chunk().await? {
        for data in decoder.push(&chunk) {
            if let Some(response) = match_response(&data, expected_id) {
                return Ok(response);
            }
        }
    }
    decoder
        .finish()
        .iter()
        .find_map(|data| match_response(data, expected_id))
        .ok_or_else(|| McpError::Protocol(format!("Stream ended without a response to request {}", expected_id)))
}

fn match_response(payload: &str, expected_id: u64) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<JsonRpcResponse>(payload) {
        Ok(response) if response.id.as_ref().and_then(Value::as_u64) == Some(expected_id) => Some(response),
        Ok(_) => {
            tracing::debug!("Skipping message not addressed to request {}: {}", expected_id, payload);
            None
        }
        Err(e) => {
            tracing::debug!("Skipping non-response payload ({}): {}", e, payload);
            None
        }
    }
}

/// Concatenate the text of every message in a prompts/get result
fn prompt_text(prompt: &Value) -> String {
    let Some(messages) = prompt.get("messages").and_then(|m| m.as_array()) else {
        return String::new();
    };
    messages
        .iter()
        .filter_map(|m| {
            let content = m.get("content")?;
            content
                .as_str()
                .or_else(|| content.get("text").and_then(|t| t.as_str()))
                .map(str::to_string)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Probe a server: connect, count its catalog, disconnect.
///
/// Never fails; an unreachable or misbehaving server is reported as disconnected.
pub async fn check_server_status(http: &reqwest::Client, url: &str) -> ServerStatus {
    if url.trim().is_empty() {
        return ServerStatus::disconnected();
    }

    match McpSession::open(http, url).await {
        Ok(session) => {
            let status = ServerStatus {
                connected: true,
                server_info: Some(session.server_info().to_string()),
                tool_count: Some(session.tools().len()),
                system_prompt_count: Some(session.prompts().len()),
            };
            session.close().await;
            status
        }
        Err(e) => {
            tracing::error!("Failed to check MCP status: {}", e);
            ServerStatus::disconnected()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_response_requires_matching_numeric_id() {
        let body = r#"{"jsonrpc":"2.0","id":4,"result":{"tools":[]}}"#;
        assert!(match_response(body, 4).is_some());
        assert!(match_response(body, 5).is_none());
        assert!(match_response(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#, 4).is_none());
        assert!(match_response("not json", 4).is_none());
    }

    #[test]
    fn prompt_text_joins_text_messages() {
        let prompt = json!({
            "messages": [
                {"role": "user", "content": {"type": "text", "text": "Extract entities."}},
                {"role": "user", "content": "Then relations."},
                {"role": "user", "content": {"type": "image", "data": "..."}}
            ]
        });
        assert_eq!(prompt_text(&prompt), "Extract entities.\n\nThen relations.");
        assert_eq!(prompt_text(&json!({})), "");
    }

    #[test]
    fn tool_result_parses_mcp_wire_shape() {
        let result: McpToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "{\"entities\":[]}"}],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.first_text(), Some("{\"entities\":[]}"));
        assert!(!result.is_error);
    }

    #[test]
    fn server_info_displays_name_and_version() {
        let info = ServerInfo {
            name: "memory".to_string(),
            version: "0.6.2".to_string(),
        };
        assert_eq!(info.to_string(), "memory v0.6.2");
    }

    #[tokio::test]
    async fn status_of_empty_url_is_disconnected_without_network() {
        let http = reqwest::Client::new();
        assert_eq!(check_server_status(&http, "  ").await, ServerStatus::disconnected());
    }
}
