//! Development knowledge-graph MCP server used by mcp-notes.

mod server;

pub use server::{
    run_with_args, serve, spawn_for_tests, CliArgs, Entity, KnowledgeGraph, KnowledgeServerOptions, Relation,
    SessionCounts, DEFAULT_HOST, DEFAULT_PORT, KNOWLEDGE_EXTRACTOR_PROMPT, PROTOCOL_VERSION, SESSION_HEADER,
};
