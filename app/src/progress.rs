//! Stage/progress model shared by both orchestration flows.
//!
//! Orchestrators write through a [`ProgressReporter`], which sends typed
//! [`ProgressEvent`]s over an unbounded channel. The front-end folds those
//! events into a [`ProgressView`]. Which stages render as completed is
//! derived from the current stage by [`stage_states`]; it is never stored.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::ToolExecutionResult;

// ============ Stages ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Understanding,
    GeneratingParameters,
    Saving,
    FetchingKnowledge,
    GeneratingInspiration,
    Done,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Note,
    Inspiration,
}

const NOTE_STAGES: &[Stage] = &[Stage::Understanding, Stage::GeneratingParameters, Stage::Saving, Stage::Done];
const INSPIRATION_STAGES: &[Stage] = &[Stage::FetchingKnowledge, Stage::GeneratingInspiration, Stage::Done];

impl FlowKind {
    /// Ordered stages shown for this flow; `Error` is never part of the list.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            FlowKind::Note => NOTE_STAGES,
            FlowKind::Inspiration => INSPIRATION_STAGES,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            FlowKind::Note => "Note processing",
            FlowKind::Inspiration => "Inspiration",
        }
    }

    /// Position of `stage` in this flow, `None` for `Error` or a foreign stage
    pub fn index_of(self, stage: Stage) -> Option<usize> {
        self.stages().iter().position(|s| *s == stage)
    }

    pub fn stage_label(self, stage: Stage) -> &'static str {
        match stage {
            Stage::Understanding => "LLM is reading the note",
            Stage::GeneratingParameters => "Generating function-call parameters",
            Stage::Saving => "Saving to the knowledge graph",
            Stage::FetchingKnowledge => "Reading knowledge from the MCP server",
            Stage::GeneratingInspiration => "LLM is generating new ideas",
            Stage::Done => match self {
                FlowKind::Note => "Saved",
                FlowKind::Inspiration => "Inspiration ready",
            },
            Stage::Error => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Active,
    Completed,
}

/// Render state of every stage of `flow` given the current stage.
///
/// A stage is completed when it sits before the current one, or the run is
/// done. On `Error` (or before a run starts) nothing is active or completed.
pub fn stage_states(flow: FlowKind, current: Option<Stage>) -> Vec<(Stage, StageState)> {
    let current_index = current.and_then(|s| flow.index_of(s));
    let done = current == Some(Stage::Done);

    flow.stages()
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            let state = if done || current_index.map(|c| index < c).unwrap_or(false) {
                StageState::Completed
            } else if current_index == Some(index) {
                StageState::Active
            } else {
                StageState::Pending
            };
            (*stage, state)
        })
        .collect()
}

// ============ Events ============

/// Progress of one run, in emission order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageChanged { flow: FlowKind, stage: Stage },
    /// Serialized tool-call delta received while generating parameters
    Streaming { data: String },
    ToolSaved { result: ToolExecutionResult },
    Done { result: String },
    Error { message: String },
}

impl ProgressEvent {
    /// The stage this event moves the run into, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProgressEvent::StageChanged { stage, .. } => Some(*stage),
            ProgressEvent::Done { .. } => Some(Stage::Done),
            ProgressEvent::Error { .. } => Some(Stage::Error),
            ProgressEvent::Streaming { .. } | ProgressEvent::ToolSaved { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. } | ProgressEvent::Error { .. })
    }
}

/// Writing side of the progress channel for a single run.
///
/// Stages only move forward, and exactly one terminal event (`Done` or
/// `Error`) is ever sent; later calls are ignored.
pub struct ProgressReporter {
    flow: FlowKind,
    tx: UnboundedSender<ProgressEvent>,
    current: Option<Stage>,
    pacing: Duration,
}

impl ProgressReporter {
    pub fn new(flow: FlowKind, tx: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            flow,
            tx,
            current: None,
            pacing: Duration::ZERO,
        }
    }

    /// Pause after each non-terminal stage so a human can follow along
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.current.map(Stage::is_terminal).unwrap_or(false)
    }

    /// Move to a later non-terminal stage of this flow.
    pub async fn advance(&mut self, stage: Stage) {
        if self.is_finished() || stage.is_terminal() {
            tracing::warn!("Ignoring stage {:?} after run finished or as terminal stage", stage);
            return;
        }
        let Some(next) = self.flow.index_of(stage) else {
            tracing::warn!("Stage {:?} is not part of the {:?} flow", stage, self.flow);
            return;
        };
        if let Some(current) = self.current.and_then(|s| self.flow.index_of(s)) {
            if next <= current {
                tracing::warn!("Ignoring backwards stage change {:?} -> {:?}", self.current, stage);
                return;
            }
        }

        tracing::info!("{} stage: {:?}", self.flow.title(), stage);
        self.current = Some(stage);
        self.send(ProgressEvent::StageChanged { flow: self.flow, stage });

        if !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }
    }

    pub fn stream(&mut self, data: String) {
        if self.is_finished() {
            return;
        }
        self.send(ProgressEvent::Streaming { data });
    }

    pub fn tool_saved(&mut self, result: ToolExecutionResult) {
        if self.is_finished() {
            return;
        }
        self.send(ProgressEvent::ToolSaved { result });
    }

    pub fn finish(&mut self, result: String) {
        if self.is_finished() {
            return;
        }
        tracing::info!("{} stage: Done", self.flow.title());
        self.current = Some(Stage::Done);
        self.send(ProgressEvent::Done { result });
    }

    pub fn fail(&mut self, message: impl std::fmt::Display) {
        if self.is_finished() {
            return;
        }
        let message = message.to_string();
        tracing::error!("{} failed: {}", self.flow.title(), message);
        self.current = Some(Stage::Error);
        self.send(ProgressEvent::Error { message });
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Progress receiver dropped; event discarded");
        }
    }
}

// ============ Presentation state ============

/// Accumulated streaming text shown while parameters are generated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamBuffer {
    text: String,
}

impl StreamBuffer {
    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// What the front-end shows for the most recent run
#[derive(Debug, Clone, Default)]
pub struct ProgressView {
    flow: Option<FlowKind>,
    stage: Option<Stage>,
    streaming: StreamBuffer,
    saved: Vec<ToolExecutionResult>,
    result: Option<String>,
    error: Option<String>,
}

impl ProgressView {
    /// Reset for a new run of `flow`
    pub fn begin(&mut self, flow: FlowKind) {
        *self = ProgressView {
            flow: Some(flow),
            ..ProgressView::default()
        };
    }

    /// True when `event` opens a new run: another flow, or the last run already finished
    pub fn starts_new_run(&self, event: &ProgressEvent) -> bool {
        match event {
            ProgressEvent::StageChanged { flow, .. } => {
                self.flow != Some(*flow) || self.stage.map(Stage::is_terminal).unwrap_or(false)
            }
            _ => false,
        }
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        if let ProgressEvent::StageChanged { flow, .. } = event {
            if self.starts_new_run(event) {
                self.begin(*flow);
            }
        }
        match event {
            ProgressEvent::StageChanged { stage, .. } => {
                self.stage = Some(*stage);
            }
            ProgressEvent::Streaming { data } => self.streaming.push(data),
            ProgressEvent::ToolSaved { result } => self.saved.push(result.clone()),
            ProgressEvent::Done { result } => {
                self.stage = Some(Stage::Done);
                self.result = Some(result.clone());
            }
            ProgressEvent::Error { message } => {
                self.stage = Some(Stage::Error);
                self.error = Some(message.clone());
            }
        }
    }

    pub fn flow(&self) -> Option<FlowKind> {
        self.flow
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// A run has started and not reached Done or Error
    pub fn is_running(&self) -> bool {
        self.stage.map(|s| !s.is_terminal()).unwrap_or(false)
    }

    pub fn streaming(&self) -> &str {
        self.streaming.as_str()
    }

    pub fn saved(&self) -> &[ToolExecutionResult] {
        &self.saved
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn stage_states(&self) -> Vec<(Stage, StageState)> {
        match self.flow {
            Some(flow) => stage_states(flow, self.stage),
            None => Vec::new(),
        }
    }
}
