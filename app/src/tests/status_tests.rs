//! Server status checks and the save-then-check settings path.

use mcp_test_server::{KnowledgeServerOptions, SessionCounts};

use super::{unreachable_url, TestServer};
use crate::app_state::SettingsState;
use crate::mcp_client::{check_server_status, McpSession};
use crate::orchestrator::NoteWorkbench;
use crate::settings::{load_settings_from, AppSettings};

#[tokio::test]
async fn status_reports_server_catalog() {
    let server = TestServer::start(KnowledgeServerOptions::default()).await;
    let status = check_server_status(&reqwest::Client::new(), &server.url).await;

    assert!(status.connected);
    assert_eq!(status.server_info.as_deref(), Some("mcp-test-server v0.1.0"));
    assert_eq!(status.tool_count, Some(5));
    assert_eq!(status.system_prompt_count, Some(1));
}

#[tokio::test]
async fn status_without_prompts_capability_counts_zero_prompts() {
    let server = TestServer::start(KnowledgeServerOptions {
        serve_prompts: false,
        ..KnowledgeServerOptions::default()
    })
    .await;
    let status = check_server_status(&reqwest::Client::new(), &server.url).await;
    assert!(status.connected);
    assert_eq!(status.system_prompt_count, Some(0));
}

#[tokio::test]
async fn unreachable_server_is_disconnected() {
    let status = check_server_status(&reqwest::Client::new(), &unreachable_url().await).await;
    assert!(!status.connected);
    assert!(status.server_info.is_none());
}

#[tokio::test]
async fn session_executes_tools_and_closes() {
    let server = TestServer::start(KnowledgeServerOptions::default()).await;
    let http = reqwest::Client::new();
    let mut session = McpSession::open(&http, &server.url).await.expect("session opens");

    assert!(session.find_prompt("knowledge_extractor").is_some());
    let result = session
        .call_tool(
            "create_entities",
            serde_json::json!({"entities": [{"name": "Serde", "entityType": "library", "observations": []}]}),
        )
        .await
        .expect("tool call");
    assert!(!result.is_error);

    let err = session
        .call_tool("no_such_tool", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, crate::error::McpError::Rpc { code: -32602, .. }));

    assert_eq!(server.sessions().await.open, 1);
    session.close().await;
    assert_eq!(server.sessions().await, SessionCounts { open: 0, closed: 1 });
    assert_eq!(server.graph().await.entities.len(), 1);
}

#[tokio::test]
async fn saving_settings_persists_then_checks_new_server() {
    let server = TestServer::start(KnowledgeServerOptions::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");
    let bench = NoteWorkbench::new(SettingsState::new(AppSettings::default(), path.clone()));

    let settings = AppSettings {
        server_url: server.url.clone(),
        ..AppSettings::default()
    };
    let status = bench.save_settings(&settings).await.expect("settings saved");

    assert!(status.connected);
    assert_eq!(load_settings_from(&path).await, settings);
    assert_eq!(bench.settings().snapshot().await.server_url, server.url);
}
