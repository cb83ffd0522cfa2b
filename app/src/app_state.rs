//! Shared application state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::SettingsError;
use crate::settings::{load_settings_from, save_settings_to, AppSettings};

/// Launch-time settings overrides; applied in memory, never persisted.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub server_url: Option<String>,
    pub llm_api_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut AppSettings) {
        if let Some(url) = &self.server_url {
            settings.server_url = url.clone();
        }
        if let Some(url) = &self.llm_api_url {
            settings.llm_api_url = url.clone();
        }
        if let Some(key) = &self.llm_api_key {
            settings.llm_api_key = key.clone();
        }
        if let Some(model) = &self.llm_model {
            settings.llm_model = model.clone();
        }
    }
}

/// Shared settings state
#[derive(Clone)]
pub struct SettingsState {
    pub settings: Arc<RwLock<AppSettings>>,
    path: PathBuf,
    overrides: SettingsOverrides,
}

impl SettingsState {
    /// Load from `path` once, applying `overrides` on top.
    pub async fn load(path: PathBuf, overrides: SettingsOverrides) -> Self {
        let mut settings = load_settings_from(&path).await;
        overrides.apply(&mut settings);
        Self {
            settings: Arc::new(RwLock::new(settings)),
            path,
            overrides,
        }
    }

    /// In-memory state for tests and embedding; `save` still writes to `path`.
    pub fn new(settings: AppSettings, path: PathBuf) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            path,
            overrides: SettingsOverrides::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current settings
    pub async fn snapshot(&self) -> AppSettings {
        self.settings.read().await.clone()
    }

    /// Persist `settings`, then reload from disk so the shared copy matches the file.
    pub async fn save(&self, settings: &AppSettings) -> Result<AppSettings, SettingsError> {
        save_settings_to(&self.path, settings).await?;
        self.reload().await;
        Ok(self.snapshot().await)
    }

    pub async fn reload(&self) {
        let mut fresh = load_settings_from(&self.path).await;
        self.overrides.apply(&mut fresh);
        *self.settings.write().await = fresh;
    }
}
