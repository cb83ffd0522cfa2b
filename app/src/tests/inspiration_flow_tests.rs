//! End-to-end runs of the "generate inspiration" flow.

use mcp_test_server::{Entity, KnowledgeGraph, KnowledgeServerOptions, Relation, SessionCounts};
use tokio::sync::mpsc;

use super::mock_llm::{MockLlm, MockReply};
use super::{drain, settings_for, stages, unreachable_url, workbench, TestServer};
use crate::error::{LlmError, NoteError};
use crate::llm::{COMPLETION_MAX_TOKENS, COMPLETION_TEMPERATURE};
use crate::progress::{ProgressEvent, Stage};
use crate::settings::AppSettings;

fn seeded_options() -> KnowledgeServerOptions {
    let entities = (1..=9)
        .map(|i| Entity {
            name: format!("K{}", i),
            entity_type: "concept".to_string(),
            observations: vec![format!("fact number {}", i)],
        })
        .collect();
    let relations = vec![Relation {
        from: "K1".to_string(),
        to: "K2".to_string(),
        relation_type: "relates_to".to_string(),
    }];
    KnowledgeServerOptions {
        seed: KnowledgeGraph { entities, relations },
        ..KnowledgeServerOptions::default()
    }
}

fn inspiration_settings(server_url: &str, llm_url: &str) -> AppSettings {
    AppSettings {
        inspiration_prompt_template: "Note: {note}\nKnown:\n{knowledge}".to_string(),
        ..settings_for(server_url, llm_url)
    }
}

#[tokio::test]
async fn successful_run_samples_knowledge_into_prompt() {
    let server = TestServer::start(seeded_options()).await;
    let llm = MockLlm::spawn(MockReply::Completion("Try linking K3 with K7.".to_string())).await;
    let bench = workbench(inspiration_settings(&server.url, &llm.base_url));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let text = bench
        .generate_inspiration("thinking about graphs", tx)
        .await
        .expect("inspiration generated");
    let events = drain(&mut rx);

    assert_eq!(text, "Try linking K3 with K7.");
    assert_eq!(
        stages(&events),
        vec![Stage::FetchingKnowledge, Stage::GeneratingInspiration, Stage::Done]
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Streaming { .. } | ProgressEvent::ToolSaved { .. })));

    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    assert_eq!(body["stream"], false);
    assert_eq!(body["max_tokens"], COMPLETION_MAX_TOKENS);
    assert_eq!(body["temperature"], COMPLETION_TEMPERATURE);
    assert_eq!(body["messages"].as_array().map(|m| m.len()), Some(1));
    assert_eq!(body["messages"][0]["role"], "user");

    let prompt = body["messages"][0]["content"].as_str().expect("prompt text");
    assert!(prompt.starts_with("Note: thinking about graphs\nKnown:\n"));
    assert_eq!(prompt.matches("(concept)").count(), 8);
    assert!(!prompt.contains("{knowledge}"));
}

#[tokio::test]
async fn empty_note_is_allowed() {
    let server = TestServer::start(seeded_options()).await;
    let llm = MockLlm::spawn(MockReply::Completion("Start with K1.".to_string())).await;
    let bench = workbench(inspiration_settings(&server.url, &llm.base_url));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let text = bench.generate_inspiration("", tx).await.expect("inspiration generated");
    assert_eq!(text, "Start with K1.");
    assert_eq!(stages(&drain(&mut rx)).last(), Some(&Stage::Done));

    let prompt = llm.requests()[0].body["messages"][0]["content"].clone();
    assert!(prompt.as_str().unwrap_or_default().starts_with("Note: \nKnown:"));
}

#[tokio::test]
async fn missing_read_graph_tool_is_a_knowledge_fetch_error() {
    let server = TestServer::start(KnowledgeServerOptions {
        hidden_tools: vec!["read_graph".to_string()],
        ..seeded_options()
    })
    .await;
    let llm = MockLlm::spawn(MockReply::Completion("unused".to_string())).await;
    let bench = workbench(inspiration_settings(&server.url, &llm.base_url));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = bench.generate_inspiration("note", tx).await.unwrap_err();

    assert!(matches!(err, NoteError::KnowledgeFetch(_)));
    assert_eq!(stages(&drain(&mut rx)), vec![Stage::FetchingKnowledge, Stage::Error]);
    assert!(llm.requests().is_empty());
}

#[tokio::test]
async fn discovery_failure_never_reaches_generation() {
    let llm = MockLlm::spawn(MockReply::Completion("unused".to_string())).await;
    let bench = workbench(inspiration_settings(&unreachable_url().await, &llm.base_url));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = bench.generate_inspiration("note", tx).await.unwrap_err();

    assert!(matches!(err, NoteError::Discovery(_)));
    assert_eq!(stages(&drain(&mut rx)), vec![Stage::FetchingKnowledge, Stage::Error]);
    assert!(llm.requests().is_empty());
}

#[tokio::test]
async fn llm_rejection_is_reported_with_status() {
    let server = TestServer::start(seeded_options()).await;
    let llm = MockLlm::spawn(MockReply::Status(401, "invalid api key".to_string())).await;
    let settings = AppSettings {
        llm_api_key: String::new(),
        ..inspiration_settings(&server.url, &llm.base_url)
    };
    let bench = workbench(settings);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = bench.generate_inspiration("note", tx).await.unwrap_err();
    let events = drain(&mut rx);

    assert!(matches!(err, NoteError::Llm(LlmError::Status { status: 401, .. })));
    assert_eq!(
        stages(&events),
        vec![Stage::FetchingKnowledge, Stage::GeneratingInspiration, Stage::Error]
    );
    // No key configured, no Authorization header sent
    assert_eq!(llm.requests()[0].authorization, None);
}

#[tokio::test]
async fn knowledge_session_is_closed_after_success_and_after_failure() {
    let server = TestServer::start(seeded_options()).await;

    let llm = MockLlm::spawn(MockReply::Completion("Connect K1 and K9.".to_string())).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    workbench(inspiration_settings(&server.url, &llm.base_url))
        .generate_inspiration("note", tx)
        .await
        .expect("inspiration generated");
    assert_eq!(server.sessions().await, SessionCounts { open: 0, closed: 1 });

    let failing = MockLlm::spawn(MockReply::Status(503, "unavailable".to_string())).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = workbench(inspiration_settings(&server.url, &failing.base_url))
        .generate_inspiration("note", tx)
        .await
        .unwrap_err();
    assert!(matches!(err, NoteError::Llm(LlmError::Status { status: 503, .. })));
    assert_eq!(server.sessions().await, SessionCounts { open: 0, closed: 2 });
}

#[tokio::test]
async fn note_only_template_still_runs_without_knowledge() {
    let server = TestServer::start(seeded_options()).await;
    let llm = MockLlm::spawn(MockReply::Completion("Write more.".to_string())).await;
    let settings = AppSettings {
        inspiration_prompt_template: "Note: {note}".to_string(),
        ..settings_for(&server.url, &llm.base_url)
    };

    let (tx, _rx) = mpsc::unbounded_channel();
    let text = workbench(settings)
        .generate_inspiration("hello", tx)
        .await
        .expect("inspiration generated");
    assert_eq!(text, "Write more.");
    assert_eq!(llm.requests()[0].body["messages"][0]["content"], "Note: hello");
}
