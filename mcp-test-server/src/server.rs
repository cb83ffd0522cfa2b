//! Knowledge-graph MCP server for mcp-notes development
//!
//! - Serves MCP (JSON-RPC 2.0) over HTTP on `POST /mcp`, sessions end on `DELETE /mcp`
//! - Keeps an in-memory knowledge graph of entities and relations
//! - Offers the `knowledge_extractor` system prompt through `prompts/*`
//! - Exposes the current graph, session counts and a rolling request log as JSON for inspection

use axum::{
    extract::State as AxumState,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

// -----------------------------------------------------------------------------
// Constants
// -----------------------------------------------------------------------------

pub const DEFAULT_HOST: &str = "127.0.0.1";
// Use a less common default port to reduce clashes with local services.
pub const DEFAULT_PORT: u16 = 43030;
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const KNOWLEDGE_EXTRACTOR_PROMPT: &str = "You are a knowledge extractor. Read the user's note and \
record what it teaches as a knowledge graph. Call create_entities for every person, concept, place or \
project worth remembering, with short factual observations. Then call create_relations to connect \
them, using active-voice relation types such as \"works_on\" or \"depends_on\". Do not answer in prose; \
only call tools.";

// -----------------------------------------------------------------------------
// CLI
// -----------------------------------------------------------------------------

#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-test-server", about = "Dev knowledge-graph MCP server")]
pub struct CliArgs {
    /// Host interface to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,
    /// Port to bind
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Serve the knowledge_extractor system prompt
    #[arg(long, default_value_t = true, value_parser = clap::builder::BoolishValueParser::new(), action = clap::ArgAction::Set)]
    pub serve_prompts: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            serve_prompts: true,
        }
    }
}

/// Knobs for the server's catalog, mostly used to provoke failure paths in tests.
#[derive(Debug, Clone)]
pub struct KnowledgeServerOptions {
    pub server_name: String,
    pub server_version: String,
    /// Advertise the `prompts` capability and the knowledge_extractor prompt
    pub serve_prompts: bool,
    /// Tools left out of `tools/list` and rejected by `tools/call`
    pub hidden_tools: Vec<String>,
    /// Graph contents at startup
    pub seed: KnowledgeGraph,
}

impl Default for KnowledgeServerOptions {
    fn default() -> Self {
        Self {
            server_name: "mcp-test-server".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            serve_prompts: true,
            hidden_tools: Vec::new(),
            seed: KnowledgeGraph::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// Knowledge graph model
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub relation_type: String,
}

/// Session bookkeeping served on `/api/sessions`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub open: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    /// Insert entities whose names are not taken yet, returning the ones added.
    fn create_entities(&mut self, entities: Vec<Entity>) -> Vec<Entity> {
        let mut created = Vec::new();
        for entity in entities {
            if self.entities.iter().any(|e| e.name == entity.name) {
                continue;
            }
            self.entities.push(entity.clone());
            created.push(entity);
        }
        created
    }

    fn create_relations(&mut self, relations: Vec<Relation>) -> Vec<Relation> {
        let mut created = Vec::new();
        for relation in relations {
            if self.relations.contains(&relation) {
                continue;
            }
            self.relations.push(relation.clone());
            created.push(relation);
        }
        created
    }

    fn add_observations(&mut self, entity_name: &str, contents: Vec<String>) -> Result<Vec<String>, String> {
        let entity = self
            .entities
            .iter_mut()
            .find(|e| e.name == entity_name)
            .ok_or_else(|| format!("Entity with name {} not found", entity_name))?;
        let mut added = Vec::new();
        for content in contents {
            if !entity.observations.contains(&content) {
                entity.observations.push(content.clone());
                added.push(content);
            }
        }
        Ok(added)
    }

    /// Entities matching `query` in name, type or observations, plus the relations among them.
    fn search(&self, query: &str) -> KnowledgeGraph {
        let needle = query.to_lowercase();
        let entities: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| {
                e.name.to_lowercase().contains(&needle)
                    || e.entity_type.to_lowercase().contains(&needle)
                    || e.observations.iter().any(|o| o.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        let relations = self
            .relations
            .iter()
            .filter(|r| names.contains(r.from.as_str()) && names.contains(r.to.as_str()))
            .cloned()
            .collect();
        KnowledgeGraph { entities, relations }
    }
}

// -----------------------------------------------------------------------------
// Shared state
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    timestamp: String,
    level: String,
    message: String,
}

#[derive(Debug)]
struct SharedState {
    options: KnowledgeServerOptions,
    graph: RwLock<KnowledgeGraph>,
    logs: RwLock<Vec<LogEntry>>,
    sessions: RwLock<HashSet<String>>,
    closed_sessions: AtomicUsize,
}

impl SharedState {
    fn new(options: KnowledgeServerOptions) -> Self {
        let graph = options.seed.clone();
        Self {
            options,
            graph: RwLock::new(graph),
            logs: RwLock::new(Vec::new()),
            sessions: RwLock::new(HashSet::new()),
            closed_sessions: AtomicUsize::new(0),
        }
    }

    async fn log(&self, level: &str, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            message: message.into(),
        };
        let mut logs = self.logs.write().await;
        if logs.len() >= 500 {
            logs.drain(0..100);
        }
        logs.push(entry);
    }

    fn is_hidden(&self, tool_name: &str) -> bool {
        self.options.hidden_tools.iter().any(|t| t == tool_name)
    }
}

// -----------------------------------------------------------------------------
// JSON-RPC structs (MCP)
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

// -----------------------------------------------------------------------------
// Entry points
// -----------------------------------------------------------------------------

pub async fn run_with_args(args: CliArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        "mcp-test-server listening on http://{}/mcp (serve_prompts={})",
        listener.local_addr()?,
        args.serve_prompts
    );

    let options = KnowledgeServerOptions {
        serve_prompts: args.serve_prompts,
        ..KnowledgeServerOptions::default()
    };
    serve(listener, options).await?;
    Ok(())
}

/// Serve the MCP endpoint on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, options: KnowledgeServerOptions) -> std::io::Result<()> {
    let state = Arc::new(SharedState::new(options));
    axum::serve(listener, router(state)).await
}

/// Bind an ephemeral local port and serve in the background.
///
/// Returns the MCP endpoint URL and the server task; abort the task to stop.
pub async fn spawn_for_tests(options: KnowledgeServerOptions) -> std::io::Result<(String, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, options).await {
            tracing::error!("mcp-test-server exited: {}", e);
        }
    });
    Ok((format!("http://{}/mcp", addr), handle))
}

fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_post_handler).delete(mcp_delete_handler))
        .route("/api/graph", get(graph_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/api/logs", get(logs_handler))
        .with_state(state)
}

// -----------------------------------------------------------------------------
// HTTP handlers
// -----------------------------------------------------------------------------

async fn mcp_post_handler(
    AxumState(state): AxumState<Arc<SharedState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    state.log("info", format!("MCP recv: {}", body.trim())).await;

    let request = match serde_json::from_str::<JsonRpcRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            state.log("error", format!("Parse error: {}", e)).await;
            let response = JsonRpcResponse::err(Value::Null, -32700, format!("Parse error: {}", e));
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(session) = &session {
        if !state.sessions.read().await.contains(session) {
            state.log("warn", format!("Unknown session {}", session)).await;
            return StatusCode::NOT_FOUND.into_response();
        }
    }

    // Notifications carry no id and get no body back
    let Some(id) = request.id.clone() else {
        tracing::debug!("mcp-test-server notification: {}", request.method);
        return StatusCode::ACCEPTED.into_response();
    };

    let mut response_headers = HeaderMap::new();
    if request.method == "initialize" {
        let session_id = uuid::Uuid::new_v4().to_string();
        state.sessions.write().await.insert(session_id.clone());
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            response_headers.insert(SESSION_HEADER, value);
        }
    }

    let response = handle_request(id, request, &state).await;
    if let Ok(serialized) = serde_json::to_string(&response) {
        state.log("info", format!("MCP send: {}", serialized)).await;
    }
    (StatusCode::OK, response_headers, Json(response)).into_response()
}

async fn mcp_delete_handler(AxumState(state): AxumState<Arc<SharedState>>, headers: HeaderMap) -> StatusCode {
    let Some(session) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.sessions.write().await.remove(session) {
        state.closed_sessions.fetch_add(1, Ordering::Relaxed);
        state.log("info", format!("Session {} closed", session)).await;
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn graph_handler(AxumState(state): AxumState<Arc<SharedState>>) -> Json<KnowledgeGraph> {
    Json(state.graph.read().await.clone())
}

async fn sessions_handler(AxumState(state): AxumState<Arc<SharedState>>) -> Json<SessionCounts> {
    Json(SessionCounts {
        open: state.sessions.read().await.len(),
        closed: state.closed_sessions.load(Ordering::Relaxed),
    })
}

async fn logs_handler(AxumState(state): AxumState<Arc<SharedState>>) -> Json<Value> {
    let logs = state.logs.read().await.clone();
    Json(json!({ "logs": logs }))
}

// -----------------------------------------------------------------------------
// JSON-RPC dispatch
// -----------------------------------------------------------------------------

async fn handle_request(id: Value, request: JsonRpcRequest, state: &SharedState) -> JsonRpcResponse {
    let params = request.params.unwrap_or_else(|| json!({}));

    match request.method.as_str() {
        "initialize" => {
            let mut capabilities = json!({ "tools": {} });
            if state.options.serve_prompts {
                capabilities["prompts"] = json!({});
            }
            JsonRpcResponse::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": capabilities,
                    "serverInfo": {
                        "name": state.options.server_name,
                        "version": state.options.server_version
                    }
                }),
            )
        }
        "ping" => JsonRpcResponse::ok(id, json!({})),
        "tools/list" => {
            let tools: Vec<Tool> = get_tools().into_iter().filter(|t| !state.is_hidden(&t.name)).collect();
            JsonRpcResponse::ok(id, json!({ "tools": tools }))
        }
        "tools/call" => {
            let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

            if state.is_hidden(&tool_name) || !get_tools().iter().any(|t| t.name == tool_name) {
                return JsonRpcResponse::err(id, -32602, format!("Unknown tool: {}", tool_name));
            }

            let (text, is_error) = match execute_tool(&tool_name, arguments, state).await {
                Ok(text) => (text, false),
                Err(text) => (text, true),
            };
            JsonRpcResponse::ok(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": is_error
                }),
            )
        }
        "prompts/list" if state.options.serve_prompts => JsonRpcResponse::ok(
            id,
            json!({
                "prompts": [{
                    "name": "knowledge_extractor",
                    "description": "Turns a free-form note into knowledge-graph tool calls",
                    "arguments": []
                }]
            }),
        ),
        "prompts/get" if state.options.serve_prompts => {
            match params.get("name").and_then(|v| v.as_str()) {
                Some("knowledge_extractor") => JsonRpcResponse::ok(
                    id,
                    json!({
                        "description": "Turns a free-form note into knowledge-graph tool calls",
                        "messages": [{
                            "role": "user",
                            "content": { "type": "text", "text": KNOWLEDGE_EXTRACTOR_PROMPT }
                        }]
                    }),
                ),
                other => JsonRpcResponse::err(id, -32602, format!("Unknown prompt: {}", other.unwrap_or(""))),
            }
        }
        _ => JsonRpcResponse::err(id, -32601, format!("Method not found: {}", request.method)),
    }
}

// -----------------------------------------------------------------------------
// Tooling
// -----------------------------------------------------------------------------

fn get_tools() -> Vec<Tool> {
    let entity_schema = json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "description": "The name of the entity"},
            "entityType": {"type": "string", "description": "The type of the entity"},
            "observations": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Observations about the entity"
            }
        },
        "required": ["name", "entityType", "observations"]
    });
    let relation_schema = json!({
        "type": "object",
        "properties": {
            "from": {"type": "string", "description": "Entity the relation starts at"},
            "to": {"type": "string", "description": "Entity the relation ends at"},
            "relationType": {"type": "string", "description": "Relation type in active voice"}
        },
        "required": ["from", "to", "relationType"]
    });

    vec![
        Tool {
            name: "create_entities".to_string(),
            description: "Create multiple new entities in the knowledge graph.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "entities": {"type": "array", "items": entity_schema} },
                "required": ["entities"]
            }),
        },
        Tool {
            name: "create_relations".to_string(),
            description: "Create multiple new relations between entities in the knowledge graph.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "relations": {"type": "array", "items": relation_schema} },
                "required": ["relations"]
            }),
        },
        Tool {
            name: "add_observations".to_string(),
            description: "Add new observations to existing entities.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "observations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "entityName": {"type": "string"},
                                "contents": {"type": "array", "items": {"type": "string"}}
                            },
                            "required": ["entityName", "contents"]
                        }
                    }
                },
                "required": ["observations"]
            }),
        },
        Tool {
            name: "read_graph".to_string(),
            description: "Read the entire knowledge graph.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        Tool {
            name: "search_nodes".to_string(),
            description: "Search the knowledge graph for entities matching a query.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "query": {"type": "string"} },
                "required": ["query"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct CreateEntitiesArgs {
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct CreateRelationsArgs {
    relations: Vec<Relation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationInput {
    entity_name: String,
    contents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddObservationsArgs {
    observations: Vec<ObservationInput>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments for {}: {}", tool, e))
}

fn to_text<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize result: {}", e))
}

async fn execute_tool(name: &str, args: Value, state: &SharedState) -> Result<String, String> {
    match name {
        "create_entities" => {
            let args: CreateEntitiesArgs = parse_args(name, args)?;
            let created = state.graph.write().await.create_entities(args.entities);
            state.log("info", format!("Created {} entities", created.len())).await;
            to_text(&created)
        }
        "create_relations" => {
            let args: CreateRelationsArgs = parse_args(name, args)?;
            let created = state.graph.write().await.create_relations(args.relations);
            state.log("info", format!("Created {} relations", created.len())).await;
            to_text(&created)
        }
        "add_observations" => {
            let args: AddObservationsArgs = parse_args(name, args)?;
            let mut graph = state.graph.write().await;
            let mut results = Vec::new();
            for input in args.observations {
                let added = graph.add_observations(&input.entity_name, input.contents)?;
                results.push(json!({ "entityName": input.entity_name, "addedObservations": added }));
            }
            to_text(&results)
        }
        "read_graph" => {
            let graph = state.graph.read().await;
            to_text(&*graph)
        }
        "search_nodes" => {
            let args: SearchArgs = parse_args(name, args)?;
            let found = state.graph.read().await.search(&args.query);
            to_text(&found)
        }
        other => Err(format!("Unknown tool: {}", other)),
    }
}
