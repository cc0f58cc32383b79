//! Purge events and the sinks that render them

use chrono::{DateTime, FixedOffset, SecondsFormat};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::models::MessageRef;
use crate::output::{field, sanitize_for_output, timestamp};

/// What a run does to the messages it selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeAction {
    Deleted,
    DryRun,
}

impl PurgeAction {
    pub fn for_dry_run(dry_run: bool) -> Self {
        if dry_run {
            PurgeAction::DryRun
        } else {
            PurgeAction::Deleted
        }
    }

    /// Prefix of the per-message line
    pub fn candidate_label(&self) -> &'static str {
        match self {
            PurgeAction::Deleted => "DELETING",
            PurgeAction::DryRun => "DRY-RUN",
        }
    }

    /// Action column of the final result line
    pub fn summary_label(&self) -> &'static str {
        match self {
            PurgeAction::Deleted => "DELETED",
            PurgeAction::DryRun => "DRY-RUN",
        }
    }
}

/// Snapshot emitted after every completed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Messages inspected so far, including ones past the cutoff
    pub examined: u64,
    pub deleted_so_far: u64,
    /// Messages found before the cutoff so far
    pub total_discovered: u64,
    pub batch_number: u64,
    pub batch_size: usize,
}

/// Final outcome of a run, reported exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeSummary {
    pub action: PurgeAction,
    pub total_affected: u64,
    pub folder_id: String,
    pub cutoff: DateTime<FixedOffset>,
    pub cancelled: bool,
    /// Set when the run ended on an error
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeEvent {
    /// A message about to be deleted (or that would be, in a dry run)
    Candidate {
        action: PurgeAction,
        message: MessageRef,
    },
    Progress(ProgressEvent),
    DeleteFailed { id: String, reason: String },
    Summary(PurgeSummary),
}

impl PurgeEvent {
    /// Delimited rendering for stdout
    pub fn to_line(&self) -> String {
        match self {
            PurgeEvent::Candidate { action, message } => format!(
                "{}|{}|{}|{}",
                action.candidate_label(),
                field(Some(message.id.as_str())),
                field(message.subject.as_deref()),
                timestamp(Some(&message.received))
            ),
            PurgeEvent::Progress(p) => format!(
                "PROGRESS|total={}|deleted={}|examined={}|batch={}|size={}",
                p.total_discovered, p.deleted_so_far, p.examined, p.batch_number, p.batch_size
            ),
            PurgeEvent::DeleteFailed { id, reason } => format!(
                "FAILED|{}|{}",
                field(Some(id.as_str())),
                sanitize_for_output(reason)
            ),
            PurgeEvent::Summary(s) => {
                let mut line = format!(
                    "RESULT|{}|total={}|folder_id={}|before={}|cancelled={}",
                    s.action.summary_label(),
                    s.total_affected,
                    field(Some(s.folder_id.as_str())),
                    s.cutoff.to_rfc3339_opts(SecondsFormat::Secs, true),
                    s.cancelled
                );
                if let Some(failure) = &s.failure {
                    line.push_str("|error=");
                    line.push_str(&sanitize_for_output(failure));
                }
                line
            }
        }
    }
}

/// Receives the events of a purge run
pub trait PurgeReporter: Send + Sync {
    fn report(&self, event: PurgeEvent);
}

/// Forward events to a channel; a closed receiver is ignored
impl PurgeReporter for UnboundedSender<PurgeEvent> {
    fn report(&self, event: PurgeEvent) {
        let _ = self.send(event);
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<PurgeEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PurgeEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl PurgeReporter for RecordingReporter {
    fn report(&self, event: PurgeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Writes delimited lines and drives an optional spinner on stderr
pub struct DelimitedReporter<W: Write + Send> {
    out: Mutex<W>,
    spinner: Option<ProgressBar>,
}

impl<W: Write + Send> DelimitedReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            spinner: None,
        }
    }

    /// Attach a spinner showing the running totals
    pub fn with_spinner(mut self, spinner: ProgressBar) -> Self {
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
        self
    }

    pub fn into_inner(self) -> Option<W> {
        self.out.into_inner().ok()
    }

    fn write_line(&self, line: &str) {
        let write = || {
            if let Ok(mut out) = self.out.lock() {
                if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
                    tracing::warn!("Failed to write purge output: {}", e);
                }
            }
        };
        match &self.spinner {
            Some(spinner) => spinner.suspend(write),
            None => write(),
        }
    }
}

impl<W: Write + Send> PurgeReporter for DelimitedReporter<W> {
    fn report(&self, event: PurgeEvent) {
        self.write_line(&event.to_line());

        let Some(spinner) = &self.spinner else {
            return;
        };
        match &event {
            PurgeEvent::Progress(p) => spinner.set_message(format!(
                "batch {} | {} matched | {} processed | {} examined",
                p.batch_number, p.total_discovered, p.deleted_so_far, p.examined
            )),
            PurgeEvent::Summary(_) => spinner.finish_and_clear(),
            _ => {}
        }
    }
}
