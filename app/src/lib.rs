pub mod app_state;
pub mod cli;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod mcp_client;
pub mod orchestrator;
pub mod progress;
pub mod protocol;
pub mod settings;
pub mod sse;
pub mod terminal;

#[cfg(test)]
mod tests;

pub use cli::{run, CliArgs};
