//! Integration tests for the note and inspiration flows
//!
//! Each test runs the dev knowledge-graph MCP server and a mock
//! chat-completions API in-process on ephemeral ports.

pub mod inspiration_flow_tests;
pub mod status_tests;

use mcp_test_server::{spawn_for_tests, KnowledgeServerOptions, SessionCounts};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::app_state::SettingsState;
use crate::orchestrator::NoteWorkbench;
use crate::progress::{ProgressEvent, Stage};
use crate::settings::AppSettings;

/// Dev MCP server running for the duration of a test
pub struct TestServer {
    pub url: String,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(options: KnowledgeServerOptions) -> Self {
        let (url, handle) = spawn_for_tests(options).await.expect("start mcp-test-server");
        Self { url, handle }
    }

    /// Current graph as served on `/api/graph`
    pub async fn graph(&self) -> mcp_test_server::KnowledgeGraph {
        let graph_url = self.url.replace("/mcp", "/api/graph");
        reqwest::get(&graph_url)
            .await
            .expect("GET /api/graph")
            .json()
            .await
            .expect("graph json")
    }

    /// Open and closed discovery sessions as served on `/api/sessions`
    pub async fn sessions(&self) -> SessionCounts {
        let sessions_url = self.url.replace("/mcp", "/api/sessions");
        reqwest::get(&sessions_url)
            .await
            .expect("GET /api/sessions")
            .json()
            .await
            .expect("session counts json")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// URL of a local port nothing listens on
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{}/mcp", addr)
}

pub fn settings_for(server_url: &str, llm_base_url: &str) -> AppSettings {
    AppSettings {
        server_url: server_url.to_string(),
        llm_api_url: llm_base_url.to_string(),
        llm_api_key: "sk-test".to_string(),
        llm_model: "test-model".to_string(),
        ..AppSettings::default()
    }
}

pub fn workbench(settings: AppSettings) -> NoteWorkbench {
    NoteWorkbench::new(SettingsState::new(settings, "unused-settings.json".into()))
}

/// Everything sent so far; call after the run returned and dropped its sender
pub fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn stages(events: &[ProgressEvent]) -> Vec<Stage> {
    events.iter().filter_map(ProgressEvent::stage).collect()
}
