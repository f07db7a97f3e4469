// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch classification runs
//!
//! A [`Scheduler`] scans a source tree, feeds unprocessed files to a fixed
//! pool of workers and reports everything it does as [`PipelineEvent`]s.
//! A [`SchedulerHandle`] pauses, resumes or stops the run from elsewhere.

mod scheduler;

pub use scheduler::Scheduler;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of one run; `Finished` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Scanning,
    Running,
    Paused,
    Stopping,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Organized { category: String, dest: PathBuf },
    Skipped { reason: String },
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// A stop request left queued files untouched
    pub stopped_early: bool,
}

impl RunSummary {
    pub(crate) fn from_outcomes(total: usize, outcomes: &[FileOutcome], stopped_early: bool) -> Self {
        let mut summary = Self {
            total,
            stopped_early,
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status {
                FileStatus::Organized { .. } => summary.succeeded += 1,
                FileStatus::Skipped { .. } => summary.skipped += 1,
                FileStatus::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Log(String),
    StateChanged(RunState),
    /// Sent after every finished unit, in completion order
    Progress { completed: usize, total: usize },
    /// JPEG bytes of what the model is about to see
    Preview { path: PathBuf, jpeg: Arc<Vec<u8>> },
    FileDone(FileOutcome),
    Finished(RunSummary),
}

/// Fire-and-forget event sender; a missing or closed receiver is not an error
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<mpsc::UnboundedSender<PipelineEvent>>);

impl EventSink {
    pub(crate) fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.0 {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }

    pub(crate) fn log(&self, message: impl Into<String>) {
        self.emit(PipelineEvent::Log(message.into()));
    }
}

/// Shared run control: state, pause flag and stop token
#[derive(Debug)]
pub(crate) struct Control {
    state: Mutex<RunState>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    events: EventSink,
}

impl Control {
    pub(crate) fn new(events: EventSink) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Mutex::new(RunState::Idle),
            paused,
            cancel: CancellationToken::new(),
            events,
        }
    }

    pub(crate) fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Move to `to` if the current state is one of `from`
    pub(crate) fn transition(&self, from: &[RunState], to: RunState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !from.contains(&state) {
            return false;
        }
        *state = to;
        drop(state);
        self.events.emit(PipelineEvent::StateChanged(to));
        true
    }

    /// Enter `Running`, or `Paused` if a pause arrived first
    pub(crate) fn start_running(&self) {
        let target = if *self.paused.borrow() {
            RunState::Paused
        } else {
            RunState::Running
        };
        self.transition(&[RunState::Scanning], target);
    }

    pub(crate) fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state = RunState::Finished;
        drop(state);
        self.events.emit(PipelineEvent::StateChanged(RunState::Finished));
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Block while paused; `false` means the worker should stop
    pub(crate) async fn checkpoint(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let mut paused = self.paused.subscribe();
        if !*paused.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            resumed = paused.wait_for(|p| !*p) => resumed.is_ok() && !self.cancel.is_cancelled(),
        }
    }
}

/// Cloneable remote control for a running [`Scheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    control: Arc<Control>,
}

impl SchedulerHandle {
    pub(crate) fn new(control: Arc<Control>) -> Self {
        Self { control }
    }

    pub fn state(&self) -> RunState {
        self.control.state()
    }

    /// Workers finish their current file and wait before starting another
    pub fn pause(&self) {
        self.control.paused.send_replace(true);
        if self.control.transition(&[RunState::Running], RunState::Paused) {
            self.control.events.log("Paused");
        }
    }

    pub fn resume(&self) {
        self.control.paused.send_replace(false);
        if self.control.transition(&[RunState::Paused], RunState::Running) {
            self.control.events.log("Resumed");
        }
    }

    /// Cooperative: in-flight files complete, queued ones are left alone
    pub fn stop(&self) {
        self.control.cancel.cancel();
        let active = [RunState::Scanning, RunState::Running, RunState::Paused];
        if self.control.transition(&active, RunState::Stopping) {
            self.control.events.log("Stopping after in-flight files");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }
}
