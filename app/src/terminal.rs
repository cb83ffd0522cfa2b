//! Terminal rendering of progress events.

use std::io::{self, Write};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::progress::{ProgressEvent, ProgressView, Stage};

pub struct TerminalRenderer<W> {
    out: W,
    view: ProgressView,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            view: ProgressView::default(),
        }
    }

    /// Render events until every sender is gone, returning the final view.
    pub async fn drive(mut self, mut rx: UnboundedReceiver<ProgressEvent>) -> ProgressView {
        while let Some(event) = rx.recv().await {
            self.handle(&event);
        }
        self.view
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        let starts_run = self.view.starts_new_run(event);
        self.view.apply(event);
        if let Err(e) = self.render(event, starts_run) {
            tracing::warn!("Failed to write progress: {}", e);
        }
    }

    pub fn view(&self) -> &ProgressView {
        &self.view
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, event: &ProgressEvent, starts_run: bool) -> io::Result<()> {
        let Some(flow) = self.view.flow() else {
            return Ok(());
        };
        let total = flow.stages().len();

        match event {
            ProgressEvent::StageChanged { stage, .. } => {
                if starts_run {
                    writeln!(self.out, "== {} ==", flow.title())?;
                }
                let position = flow.index_of(*stage).map(|i| i + 1).unwrap_or(0);
                writeln!(self.out, "[{}/{}] {}...", position, total, flow.stage_label(*stage))?;
            }
            ProgressEvent::Streaming { data } => {
                writeln!(self.out, "    > {}", data)?;
            }
            ProgressEvent::ToolSaved { result } => match (&result.error, &result.result) {
                (Some(error), _) => writeln!(self.out, "    x {}: {}", result.name, error)?,
                (None, Some(r)) if r.is_error => writeln!(
                    self.out,
                    "    x {}: {}",
                    result.name,
                    r.first_text().unwrap_or("tool reported an error")
                )?,
                _ => writeln!(self.out, "    ok {}", result.name)?,
            },
            ProgressEvent::Done { result } => {
                writeln!(self.out, "[{}/{}] {}", total, total, flow.stage_label(Stage::Done))?;
                writeln!(self.out)?;
                writeln!(self.out, "{}", result)?;
            }
            ProgressEvent::Error { message } => {
                writeln!(self.out, "{}: {}", flow.stage_label(Stage::Error), message)?;
            }
        }
        self.out.flush()
    }
}
