//! Knowledge-graph context for the inspiration prompt.
//!
//! The `read_graph` tool returns the whole graph as JSON text. We sample a
//! handful of entities from it and render them into the user's prompt template.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::NoteError;
use crate::mcp_client::McpToolResult;

/// Tool that returns the full knowledge graph
pub const READ_GRAPH_TOOL: &str = "read_graph";
/// Upper bound on entities handed to the model as context
pub const KNOWLEDGE_SAMPLE_SIZE: usize = 8;

pub const NOTE_PLACEHOLDER: &str = "{note}";
pub const KNOWLEDGE_PLACEHOLDER: &str = "{knowledge}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub relation_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    /// Random subset of at most `count` entities plus the relations between them.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> KnowledgeGraph {
        let entities = sample_items(&self.entities, count, rng);
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

/// Parse the text payload of a `read_graph` result.
pub fn parse_graph(result: &McpToolResult) -> Result<KnowledgeGraph, NoteError> {
    if result.is_error {
        return Err(NoteError::KnowledgeFetch(format!(
            "{} reported an error: {}",
            READ_GRAPH_TOOL,
            result.first_text().unwrap_or("no details")
        )));
    }
    let text = result
        .first_text()
        .ok_or_else(|| NoteError::KnowledgeFetch(format!("{} returned no text content", READ_GRAPH_TOOL)))?;
    serde_json::from_str(text)
        .map_err(|e| NoteError::KnowledgeFetch(format!("{} returned unparsable graph: {}", READ_GRAPH_TOOL, e)))
}

/// Uniform sample without replacement; returns everything when `count` covers the input.
pub fn sample_items<T: Clone, R: Rng + ?Sized>(items: &[T], count: usize, rng: &mut R) -> Vec<T> {
    items.choose_multiple(rng, count).cloned().collect()
}

/// Plain-text rendering of a graph for inclusion in a prompt
pub fn format_knowledge(graph: &KnowledgeGraph) -> String {
    let mut lines = Vec::with_capacity(graph.entities.len() + graph.relations.len());
    for entity in &graph.entities {
        if entity.observations.is_empty() {
            lines.push(format!("- {} ({})", entity.name, entity.entity_type));
        } else {
            lines.push(format!(
                "- {} ({}): {}",
                entity.name,
                entity.entity_type,
                entity.observations.join("; ")
            ));
        }
    }
    for relation in &graph.relations {
        lines.push(format!("- {} -{}-> {}", relation.from, relation.relation_type, relation.to));
    }
    lines.join("\n")
}

/// Whether `template` has a place for the sampled knowledge
pub fn template_uses_knowledge(template: &str) -> bool {
    template.contains(KNOWLEDGE_PLACEHOLDER)
}

/// Substitute `{note}` and `{knowledge}` in one pass, so placeholder-like text
/// inside the substituted values is left alone.
pub fn render_prompt(template: &str, note: &str, knowledge: &str) -> String {
    let mut out = String::with_capacity(template.len() + note.len() + knowledge.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(NOTE_PLACEHOLDER) {
            out.push_str(note);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(KNOWLEDGE_PLACEHOLDER) {
            out.push_str(knowledge);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
