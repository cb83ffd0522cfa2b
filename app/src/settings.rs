use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::SettingsError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:43030/mcp";
pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Connection settings and the inspiration prompt, persisted as flat JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// MCP server endpoint used for discovery and tool execution
    pub server_url: String,
    /// Chat-completions base URL or full endpoint
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    /// Prompt for the inspiration flow; `{note}` and `{knowledge}` are substituted.
    /// Without `{knowledge}` the sampled graph never reaches the model.
    pub inspiration_prompt_template: String,
    /// Pause after each stage change, in milliseconds (0 disables)
    pub stage_pacing_ms: u64,
}

fn default_inspiration_prompt_template() -> String {
    r#"You are a creative thinking partner. Below is a sample of what I already know, taken from my knowledge graph:

{knowledge}

And here is the note I am working on:

{note}

Connect the note with that knowledge and suggest new ideas, questions or directions worth exploring. Answer in Markdown."#
        .to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            llm_api_url: DEFAULT_LLM_API_URL.to_string(),
            llm_api_key: String::new(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            inspiration_prompt_template: default_inspiration_prompt_template(),
            stage_pacing_ms: 0,
        }
    }
}

impl AppSettings {
    /// Copy safe to print or log: the API key is masked
    pub fn redacted(&self) -> AppSettings {
        let mut copy = self.clone();
        if !copy.llm_api_key.is_empty() {
            copy.llm_api_key = "********".to_string();
        }
        copy
    }
}

/// Default path of the settings file
pub fn get_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".mcp-notes").join("settings.json")
}

/// Load settings from `path`, falling back to defaults if it is missing or unreadable
pub async fn load_settings_from(path: &Path) -> AppSettings {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => {
                tracing::info!("Settings loaded from {:?}", path);
                settings
            }
            Err(e) => {
                tracing::warn!("Failed to parse settings {:?}: {}, using defaults", path, e);
                AppSettings::default()
            }
        },
        Err(e) => {
            tracing::info!("No settings file at {:?} ({}), using defaults", path, e);
            AppSettings::default()
        }
    }
}

/// Save settings to `path`, creating its directory if needed
pub async fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    let io_error = |source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let contents = serde_json::to_string_pretty(settings)?;
    fs::write(path, contents).await.map_err(io_error)?;

    tracing::info!("Settings saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
        assert!(settings.llm_api_key.is_empty());
        assert!(settings.inspiration_prompt_template.contains("{note}"));
        assert!(settings.inspiration_prompt_template.contains("{knowledge}"));
        assert_eq!(settings.stage_pacing_ms, 0);
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let parsed: AppSettings = serde_json::from_str(r#"{"llm_model": "local-model"}"#).unwrap();
        assert_eq!(parsed.llm_model, "local-model");
        assert_eq!(parsed.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_redacted_masks_key() {
        let settings = AppSettings {
            llm_api_key: "sk-secret".to_string(),
            ..AppSettings::default()
        };
        assert_eq!(settings.redacted().llm_api_key, "********");
        assert!(AppSettings::default().redacted().llm_api_key.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            server_url: "http://localhost:9000/mcp".to_string(),
            llm_api_url: "http://localhost:8080/v1/chat/completions".to_string(),
            llm_api_key: "sk-test".to_string(),
            llm_model: "qwen2.5".to_string(),
            inspiration_prompt_template: "Note: {note}".to_string(),
            stage_pacing_ms: 250,
        };

        save_settings_to(&path, &settings).await.unwrap();
        let loaded = load_settings_from(&path).await;
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_unparsable_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert_eq!(load_settings_from(&path).await, AppSettings::default());
        assert_eq!(load_settings_from(&dir.path().join("absent.json")).await, AppSettings::default());
    }
}
