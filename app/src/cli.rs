//! Command-line argument parsing and launch configuration.
//!
//! This module handles CLI argument parsing using clap, applies launch-time
//! overrides to settings, and drives the terminal front-end.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mcp_test_server::{DEFAULT_HOST as MCP_TEST_DEFAULT_HOST, DEFAULT_PORT as MCP_TEST_DEFAULT_PORT};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::app_state::{SettingsOverrides, SettingsState};
use crate::orchestrator::NoteWorkbench;
use crate::settings::{get_config_path, load_settings_from, AppSettings};
use crate::terminal::TerminalRenderer;

/// CLI arguments for mcp-notes
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-notes", version, about = "Turn notes into knowledge-graph entries and get inspiration from them")]
pub struct CliArgs {
    /// Settings file (defaults to ~/.mcp-notes/settings.json)
    #[arg(long, global = true, value_name = "PATH", env = "MCP_NOTES_CONFIG")]
    pub config: Option<PathBuf>,
    /// Override the MCP server URL for this run (non-persistent)
    #[arg(long, value_name = "URL", env = "MCP_NOTES_SERVER_URL")]
    pub server_url: Option<String>,
    /// Override the chat-completions API URL for this run (non-persistent)
    #[arg(long, value_name = "URL", env = "MCP_NOTES_LLM_API_URL")]
    pub llm_api_url: Option<String>,
    /// Override the API key for this run (non-persistent)
    #[arg(long, value_name = "KEY", env = "MCP_NOTES_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,
    /// Override the model for this run (non-persistent)
    #[arg(long, value_name = "MODEL", env = "MCP_NOTES_LLM_MODEL")]
    pub llm_model: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract knowledge from a note and save it on the MCP server
    Process {
        #[arg(value_name = "NOTE_OR_@FILE")]
        note: String,
    },
    /// Generate ideas that connect a note with stored knowledge
    Inspire {
        #[arg(value_name = "NOTE_OR_@FILE")]
        note: Option<String>,
    },
    /// Check the connection to the configured MCP server
    Status,
    /// Show or change persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Run the dev knowledge-graph MCP server (blocks until exit)
    ServeTestServer {
        #[arg(long, value_name = "HOST", default_value = MCP_TEST_DEFAULT_HOST)]
        host: String,
        #[arg(long, value_name = "PORT", default_value_t = MCP_TEST_DEFAULT_PORT)]
        port: u16,
        /// Serve the knowledge_extractor system prompt
        #[arg(
            long,
            value_name = "BOOL",
            default_value_t = true,
            value_parser = clap::builder::BoolishValueParser::new(),
            action = clap::ArgAction::Set
        )]
        serve_prompts: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Print the effective settings (API key masked)
    Show,
    /// Persist new values, then re-check the server
    Set(SettingsUpdate),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SettingsUpdate {
    #[arg(long, value_name = "URL")]
    pub server_url: Option<String>,
    #[arg(long, value_name = "URL")]
    pub llm_api_url: Option<String>,
    #[arg(long, value_name = "KEY")]
    pub llm_api_key: Option<String>,
    #[arg(long, value_name = "MODEL")]
    pub llm_model: Option<String>,
    /// Prompt template with {note} and {knowledge} placeholders (string or @path/to/file)
    #[arg(long, value_name = "TEMPLATE_OR_@FILE")]
    pub inspiration_prompt_template: Option<String>,
    #[arg(long, value_name = "MS")]
    pub stage_pacing_ms: Option<u64>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.server_url.is_none()
            && self.llm_api_url.is_none()
            && self.llm_api_key.is_none()
            && self.llm_model.is_none()
            && self.inspiration_prompt_template.is_none()
            && self.stage_pacing_ms.is_none()
    }

    /// Apply the given values on top of `settings`
    pub fn apply(&self, settings: &mut AppSettings) -> anyhow::Result<()> {
        if let Some(v) = &self.server_url {
            settings.server_url = v.clone();
        }
        if let Some(v) = &self.llm_api_url {
            settings.llm_api_url = v.clone();
        }
        if let Some(v) = &self.llm_api_key {
            settings.llm_api_key = v.clone();
        }
        if let Some(v) = &self.llm_model {
            settings.llm_model = v.clone();
        }
        if let Some(raw) = &self.inspiration_prompt_template {
            settings.inspiration_prompt_template = read_value_or_file(raw)?;
        }
        if let Some(ms) = self.stage_pacing_ms {
            settings.stage_pacing_ms = ms;
        }
        Ok(())
    }
}

/// Read a value that may be either a literal string or a @path reference to a file
pub fn read_value_or_file(raw: &str) -> anyhow::Result<String> {
    if let Some(path) = raw.strip_prefix('@') {
        fs::read_to_string(Path::new(path)).with_context(|| format!("Failed to read {}", path))
    } else {
        Ok(raw.to_string())
    }
}

/// Launch-time overrides carried by the top-level flags / MCP_NOTES_* variables
pub fn cli_overrides(args: &CliArgs) -> SettingsOverrides {
    SettingsOverrides {
        server_url: args.server_url.clone(),
        llm_api_url: args.llm_api_url.clone(),
        llm_api_key: args.llm_api_key.clone(),
        llm_model: args.llm_model.clone(),
    }
}

pub fn resolve_config_path(args: &CliArgs) -> PathBuf {
    args.config.clone().unwrap_or_else(get_config_path)
}

/// Entry point of the `mcp-notes` binary.
pub async fn run(args: CliArgs) -> anyhow::Result<()> {
    let path = resolve_config_path(&args);
    let state = SettingsState::load(path.clone(), cli_overrides(&args)).await;
    let workbench = NoteWorkbench::new(state);

    match &args.command {
        Command::ServeTestServer {
            host,
            port,
            serve_prompts,
        } => {
            let server_args = mcp_test_server::CliArgs {
                host: host.clone(),
                port: *port,
                serve_prompts: *serve_prompts,
            };
            mcp_test_server::run_with_args(server_args)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        Command::Process { note } => {
            let note = read_value_or_file(note)?;
            let (tx, rx) = mpsc::unbounded_channel();
            let renderer = tokio::spawn(TerminalRenderer::stdout().drive(rx));
            let outcome = workbench.process_note(&note, tx).await;
            renderer.await.context("progress renderer stopped unexpectedly")?;
            outcome?;
        }
        Command::Inspire { note } => {
            let note = match note {
                Some(raw) => read_value_or_file(raw)?,
                None => String::new(),
            };
            let (tx, rx) = mpsc::unbounded_channel();
            let renderer = tokio::spawn(TerminalRenderer::stdout().drive(rx));
            let outcome = workbench.generate_inspiration(&note, tx).await;
            renderer.await.context("progress renderer stopped unexpectedly")?;
            outcome?;
        }
        Command::Status => {
            let status = workbench.check_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Settings {
            action: SettingsCommand::Show,
        } => {
            let settings = workbench.settings().snapshot().await;
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
        }
        Command::Settings {
            action: SettingsCommand::Set(update),
        } => {
            if update.is_empty() {
                anyhow::bail!("Nothing to set; pass at least one --option");
            }
            // Start from the file, not the overridden in-memory copy, so overrides are never persisted
            let mut settings = load_settings_from(&path).await;
            update.apply(&mut settings)?;
            let status = workbench.save_settings(&settings).await?;
            println!("Settings saved to {}", path.display());
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
