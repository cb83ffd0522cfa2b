//! "Generate inspiration": sample the knowledge graph and ask the model for new ideas.

use rand::Rng;
use serde_json::json;

use crate::error::NoteError;
use crate::knowledge::{
    format_knowledge, parse_graph, render_prompt, template_uses_knowledge, KnowledgeGraph, KNOWLEDGE_SAMPLE_SIZE,
    READ_GRAPH_TOOL,
};
use crate::llm::LlmClient;
use crate::mcp_client::McpSession;
use crate::progress::{ProgressReporter, Stage};
use crate::settings::AppSettings;

/// Run the inspiration flow to a terminal stage. An empty note is allowed.
pub async fn generate_inspiration<R: Rng + Send>(
    http: &reqwest::Client,
    settings: &AppSettings,
    note: &str,
    progress: &mut ProgressReporter,
    rng: &mut R,
) -> Result<String, NoteError> {
    progress.advance(Stage::FetchingKnowledge).await;

    match run(http, settings, note, progress, rng).await {
        Ok(text) => {
            progress.finish(text.clone());
            Ok(text)
        }
        Err(e) => {
            progress.fail(&e);
            Err(e)
        }
    }
}

async fn run<R: Rng + Send>(
    http: &reqwest::Client,
    settings: &AppSettings,
    note: &str,
    progress: &mut ProgressReporter,
    rng: &mut R,
) -> Result<String, NoteError> {
    let graph = fetch_knowledge(http, &settings.server_url).await?;
    let sample = graph.sample(KNOWLEDGE_SAMPLE_SIZE, rng);
    tracing::debug!(
        "Sampled {} of {} entities for inspiration",
        sample.entities.len(),
        graph.entities.len()
    );

    progress.advance(Stage::GeneratingInspiration).await;

    if !template_uses_knowledge(&settings.inspiration_prompt_template) {
        tracing::warn!(
            "Inspiration prompt template has no {{knowledge}} placeholder; {} sampled entities are not sent",
            sample.entities.len()
        );
    }
    let prompt = render_prompt(&settings.inspiration_prompt_template, note, &format_knowledge(&sample));
    let llm = LlmClient::from_settings(http.clone(), settings);
    Ok(llm.complete(&prompt).await?)
}

/// Read the whole graph through a short-lived discovery session.
pub async fn fetch_knowledge(http: &reqwest::Client, server_url: &str) -> Result<KnowledgeGraph, NoteError> {
    let mut session = McpSession::open(http, server_url)
        .await
        .map_err(NoteError::Discovery)?;
    let outcome = read_graph(&mut session).await;
    session.close().await;
    outcome
}

async fn read_graph(session: &mut McpSession) -> Result<KnowledgeGraph, NoteError> {
    if session.find_tool(READ_GRAPH_TOOL).is_none() {
        return Err(NoteError::KnowledgeFetch(format!(
            "server does not offer the {} tool",
            READ_GRAPH_TOOL
        )));
    }
    let result = session
        .call_tool(READ_GRAPH_TOOL, json!({}))
        .await
        .map_err(|e| NoteError::KnowledgeFetch(e.to_string()))?;
    parse_graph(&result)
}
