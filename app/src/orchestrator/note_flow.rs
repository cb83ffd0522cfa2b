//! "Process note": extract knowledge from a note and save it through MCP tools.

use serde_json::Value;

use crate::error::NoteError;
use crate::llm::LlmClient;
use crate::mcp_client::McpSession;
use crate::progress::{ProgressReporter, Stage};
use crate::protocol::{ToolExecutionResult, ToolInvocation};
use crate::settings::AppSettings;

/// Server prompt that instructs the model how to turn a note into graph updates
pub const KNOWLEDGE_EXTRACTOR_PROMPT: &str = "knowledge_extractor";
/// Tools offered to the model; at least one must exist on the server
pub const KNOWLEDGE_MUTATION_TOOLS: &[&str] = &["create_entities", "create_relations"];

/// Run the note flow to a terminal stage.
///
/// Empty input is rejected before anything is emitted. Otherwise the
/// reporter always ends in `Done` (with the pretty-printed results) or `Error`.
pub async fn process_note(
    http: &reqwest::Client,
    settings: &AppSettings,
    text: &str,
    progress: &mut ProgressReporter,
) -> Result<Vec<ToolExecutionResult>, NoteError> {
    if text.trim().is_empty() {
        return Err(NoteError::Validation);
    }

    progress.advance(Stage::Understanding).await;

    match run(http, settings, text, progress).await {
        Ok(results) => {
            let summary = serde_json::to_string_pretty(&results)
                .unwrap_or_else(|e| format!("{} tool calls executed ({})", results.len(), e));
            progress.finish(summary);
            Ok(results)
        }
        Err(e) => {
            progress.fail(&e);
            Err(e)
        }
    }
}

async fn run(
    http: &reqwest::Client,
    settings: &AppSettings,
    text: &str,
    progress: &mut ProgressReporter,
) -> Result<Vec<ToolExecutionResult>, NoteError> {
    let mut session = McpSession::open(http, &settings.server_url)
        .await
        .map_err(NoteError::Discovery)?;

    let outcome = run_in_session(&mut session, http, settings, text, progress).await;
    session.close().await;
    outcome
}

async fn run_in_session(
    session: &mut McpSession,
    http: &reqwest::Client,
    settings: &AppSettings,
    text: &str,
    progress: &mut ProgressReporter,
) -> Result<Vec<ToolExecutionResult>, NoteError> {
    let system_prompt = session
        .find_prompt(KNOWLEDGE_EXTRACTOR_PROMPT)
        .map(|p| p.content.clone())
        .ok_or_else(|| NoteError::Configuration(format!("system prompt '{}'", KNOWLEDGE_EXTRACTOR_PROMPT)))?;

    let tools = session.tool_schemas(KNOWLEDGE_MUTATION_TOOLS);
    if tools.is_empty() {
        return Err(NoteError::Configuration(format!(
            "knowledge tools ({})",
            KNOWLEDGE_MUTATION_TOOLS.join(", ")
        )));
    }

    progress.advance(Stage::GeneratingParameters).await;

    let llm = LlmClient::from_settings(http.clone(), settings);
    let invocations = llm
        .stream_tool_calls(&system_prompt, text, &tools, |delta| {
            progress.stream(Value::Array(delta.to_vec()).to_string());
        })
        .await?;

    progress.advance(Stage::Saving).await;

    let mut results = Vec::with_capacity(invocations.len());
    for invocation in &invocations {
        let result = execute_invocation(session, invocation).await;
        progress.tool_saved(result.clone());
        results.push(result);
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    tracing::info!("Executed {} tool calls ({} failed)", results.len(), failed);
    Ok(results)
}

/// Execute one invocation; failures are recorded in the result rather than returned.
async fn execute_invocation(session: &mut McpSession, invocation: &ToolInvocation) -> ToolExecutionResult {
    if session.find_tool(&invocation.name).is_none() {
        let err = NoteError::ToolNotFound(invocation.name.clone());
        tracing::warn!("{}", err);
        return ToolExecutionResult::failed(&invocation.name, err.to_string());
    }

    tracing::info!("Executing tool {} with args {}", invocation.name, invocation.arguments);
    match session.call_tool(&invocation.name, invocation.arguments.clone()).await {
        Ok(result) => {
            if result.is_error {
                tracing::warn!("Tool {} reported an error: {:?}", invocation.name, result.first_text());
            }
            ToolExecutionResult::succeeded(&invocation.name, result)
        }
        Err(e) => {
            tracing::error!("Tool {} failed: {}", invocation.name, e);
            ToolExecutionResult::failed(&invocation.name, e.to_string())
        }
    }
}
