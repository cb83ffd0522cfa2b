//! Orchestration of the two user actions.
//!
//! `NoteWorkbench` is the single entry point the front-end talks to. It
//! snapshots the settings at the start of each run and allows only one run
//! in flight at a time.

mod inspiration_flow;
mod note_flow;

pub use inspiration_flow::{fetch_knowledge, generate_inspiration};
pub use note_flow::{process_note, KNOWLEDGE_EXTRACTOR_PROMPT, KNOWLEDGE_MUTATION_TOOLS};

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::app_state::SettingsState;
use crate::error::{NoteError, SettingsError};
use crate::mcp_client::check_server_status;
use crate::progress::{FlowKind, ProgressEvent, ProgressReporter};
use crate::protocol::{ServerStatus, ToolExecutionResult};
use crate::settings::AppSettings;

pub struct NoteWorkbench {
    http: reqwest::Client,
    settings: SettingsState,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the run ends, however it ends.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl NoteWorkbench {
    pub fn new(settings: SettingsState) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(http: reqwest::Client, settings: SettingsState) -> Self {
        Self {
            http,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &SettingsState {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn begin_run(&self) -> Result<RunGuard<'_>, NoteError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| NoteError::RunInFlight)?;
        Ok(RunGuard { flag: &self.in_flight })
    }

    async fn reporter(&self, flow: FlowKind, tx: UnboundedSender<ProgressEvent>) -> (AppSettings, ProgressReporter) {
        let settings = self.settings.snapshot().await;
        let reporter = ProgressReporter::new(flow, tx).with_pacing(Duration::from_millis(settings.stage_pacing_ms));
        (settings, reporter)
    }

    /// Extract knowledge from `text` and save it on the MCP server.
    pub async fn process_note(
        &self,
        text: &str,
        tx: UnboundedSender<ProgressEvent>,
    ) -> Result<Vec<ToolExecutionResult>, NoteError> {
        let _guard = self.begin_run()?;
        let (settings, mut reporter) = self.reporter(FlowKind::Note, tx).await;
        process_note(&self.http, &settings, text, &mut reporter).await
    }

    /// Ask the model for ideas connecting `note` with stored knowledge.
    pub async fn generate_inspiration(&self, note: &str, tx: UnboundedSender<ProgressEvent>) -> Result<String, NoteError> {
        let _guard = self.begin_run()?;
        let (settings, mut reporter) = self.reporter(FlowKind::Inspiration, tx).await;
        let mut rng = StdRng::from_entropy();
        generate_inspiration(&self.http, &settings, note, &mut reporter, &mut rng).await
    }

    pub async fn check_status(&self) -> ServerStatus {
        let url = self.settings.snapshot().await.server_url;
        check_server_status(&self.http, &url).await
    }

    /// Persist new settings, then re-check the server they point at.
    pub async fn save_settings(&self, settings: &AppSettings) -> Result<ServerStatus, SettingsError> {
        self.settings.save(settings).await?;
        Ok(self.check_status().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn workbench() -> NoteWorkbench {
        let settings = AppSettings {
            server_url: "http://127.0.0.1:9/mcp".to_string(),
            ..AppSettings::default()
        };
        NoteWorkbench::new(SettingsState::new(settings, "unused-settings.json".into()))
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_first_is_in_flight() {
        let bench = workbench();
        let guard = bench.begin_run().unwrap();
        assert!(bench.is_running());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = bench.process_note("a note", tx.clone()).await.unwrap_err();
        assert!(matches!(err, NoteError::RunInFlight));
        let err = bench.generate_inspiration("", tx).await.unwrap_err();
        assert!(matches!(err, NoteError::RunInFlight));
        assert!(rx.try_recv().is_err());

        drop(guard);
        assert!(!bench.is_running());
    }

    #[tokio::test]
    async fn guard_is_released_after_a_failed_run() {
        let bench = workbench();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = bench.process_note("   ", tx).await.unwrap_err();
        assert!(matches!(err, NoteError::Validation));
        assert!(!bench.is_running());
        assert!(bench.begin_run().is_ok());
    }
}
