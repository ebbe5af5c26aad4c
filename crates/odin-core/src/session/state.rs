//! Flash session record and state machine.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ErrorKind;
use crate::partition::{PartitionName, PartitionSlot};

/// `Idle -> Preparing -> Flashing(step) -> {Completed, Failed, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Revalidating files and device presence.
    Preparing,
    /// Writing step `step` (index into the step sequence).
    Flashing { step: usize },
    Completed,
    Failed { step: usize, reason: ErrorKind },
    /// Cancelled between steps.
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed { .. } | SessionState::Aborted
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Preparing => write!(f, "Preparing"),
            SessionState::Flashing { step } => write!(f, "Flashing (step {})", step + 1),
            SessionState::Completed => write!(f, "Completed"),
            SessionState::Failed { step, reason } => {
                write!(f, "Failed at step {} ({})", step + 1, reason)
            }
            SessionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// One partition write, fixed at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashStep {
    pub partition: PartitionName,
    pub path: PathBuf,
    pub size: u64,
}

impl From<&PartitionSlot> for FlashStep {
    fn from(slot: &PartitionSlot) -> Self {
        Self {
            partition: slot.name,
            path: slot.path.clone().unwrap_or_default(),
            size: slot.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed { reason: ErrorKind, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub partition: PartitionName,
    pub duration: Duration,
    pub outcome: StepOutcome,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == StepOutcome::Succeeded
    }
}

/// Outcome of the reboot issued after a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebootOutcome {
    Succeeded,
    Failed { reason: ErrorKind, detail: String },
    /// Disabled in configuration.
    Skipped,
}

/// A flash session and, once terminal, its result record.
#[derive(Debug, Clone)]
pub struct FlashSession {
    device_id: String,
    steps: Vec<FlashStep>,
    state: SessionState,
    results: Vec<StepResult>,
    reboot: Option<RebootOutcome>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl FlashSession {
    pub(crate) fn new(device_id: impl Into<String>, steps: Vec<FlashStep>) -> Self {
        Self {
            device_id: device_id.into(),
            steps,
            state: SessionState::Idle,
            results: Vec::new(),
            reboot: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn steps(&self) -> &[FlashStep] {
        &self.steps
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Per-step log, in execution order.
    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    /// Secondary status: the post-flash reboot. Never affects [`Self::state`].
    pub fn reboot(&self) -> Option<&RebootOutcome> {
        self.reboot.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn current_step(&self) -> Option<usize> {
        match self.state {
            SessionState::Flashing { step } | SessionState::Failed { step, .. } => Some(step),
            _ => None,
        }
    }

    pub fn partition_at(&self, step: usize) -> Option<PartitionName> {
        self.steps.get(step).map(|s| s.partition)
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        tracing::debug!(from = %self.state, to = %state, "Session transition");
        self.state = state;
        if state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub(crate) fn record(&mut self, result: StepResult) {
        self.results.push(result);
    }

    pub(crate) fn set_reboot(&mut self, outcome: RebootOutcome) {
        self.reboot = Some(outcome);
    }
}
