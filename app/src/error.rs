//! Error types for each layer of the app.
//!
//! `McpError` and `LlmError` describe failures of the two remote services;
//! `NoteError` is what an orchestration run reports to the front-end.

use thiserror::Error;

/// Failures talking to the MCP tool server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("MCP server answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

impl McpError {
    /// JSON-RPC "method not found", returned by servers without an optional capability.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, McpError::Rpc { code: -32601, .. })
    }
}

/// Failures talking to the chat-completions API.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM API answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("LLM API error: {0}")]
    Api(String),
    #[error("Malformed stream chunk: {0}")]
    MalformedStream(String),
    #[error("Malformed arguments for tool call {name}: {reason}")]
    MalformedToolArguments { name: String, reason: String },
    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),
}

/// Failures reading or writing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that end an orchestration run in the Error stage.
#[derive(Debug, Error)]
pub enum NoteError {
    #[error("Note text is empty")]
    Validation,
    #[error("Could not open a discovery session: {0}")]
    Discovery(#[source] McpError),
    #[error("MCP server is missing {0}")]
    Configuration(String),
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    #[error("Failed to fetch knowledge: {0}")]
    KnowledgeFetch(String),
    #[error("Another run is still in progress")]
    RunInFlight,
}
