//! Explicit per-upload state machine. Illegal transitions are rejected by
//! [`StageLog`] rather than left to call order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Scan,
    Scrub,
    Extract,
    Preview,
    Dedupe,
}

impl StageName {
    /// Execution order.
    pub const ALL: [StageName; 5] = [
        StageName::Scan,
        StageName::Scrub,
        StageName::Extract,
        StageName::Preview,
        StageName::Dedupe,
    ];

    pub fn previous(&self) -> Option<StageName> {
        match self {
            StageName::Scan => None,
            StageName::Scrub => Some(StageName::Scan),
            StageName::Extract => Some(StageName::Scrub),
            StageName::Preview => Some(StageName::Extract),
            StageName::Dedupe => Some(StageName::Preview),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Scan => "scan",
            StageName::Scrub => "scrub",
            StageName::Extract => "extract",
            StageName::Preview => "preview",
            StageName::Dedupe => "dedupe",
        }
    }

    fn running_state(&self) -> PipelineState {
        match self {
            StageName::Scan => PipelineState::Scanning,
            StageName::Scrub => PipelineState::Scrubbing,
            StageName::Extract => PipelineState::Extracting,
            StageName::Preview => PipelineState::PreviewGenerating,
            StageName::Dedupe => PipelineState::Deduplicating,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Scanning,
    Scrubbing,
    Extracting,
    PreviewGenerating,
    Deduplicating,
    Completed,
    Failed(StageName),
    Cancelled(StageName),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed(_) | PipelineState::Cancelled(_)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Pending => "pending",
            PipelineState::Scanning => "scanning",
            PipelineState::Scrubbing => "scrubbing",
            PipelineState::Extracting => "extracting",
            PipelineState::PreviewGenerating => "preview_generating",
            PipelineState::Deduplicating => "deduplicating",
            PipelineState::Completed => "completed",
            PipelineState::Failed(_) => "failed",
            PipelineState::Cancelled(_) => "cancelled",
        }
    }

    /// The stage a Failed or Cancelled run stopped at.
    pub fn stopped_at(&self) -> Option<StageName> {
        match self {
            PipelineState::Failed(stage) | PipelineState::Cancelled(stage) => Some(*stage),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stopped_at() {
            Some(stage) => write!(f, "{}:{}", self.as_str(), stage),
            None => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStage {
    pub name: StageName,
    pub status: StageStatus,
    /// Completed without doing work (e.g. no preview for tabular files).
    #[serde(default)]
    pub skipped: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

impl ProcessingStage {
    fn pending(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            skipped: false,
            started_at: None,
            finished_at: None,
            detail: None,
        }
    }

    fn finish(&mut self, status: StageStatus, detail: Option<String>) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.detail = detail;
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {action} stage {stage} while it is {status:?} and the run is {state}")]
pub struct TransitionError {
    pub stage: StageName,
    pub action: &'static str,
    pub status: StageStatus,
    pub state: PipelineState,
}

/// Stage records for one run, in execution order.
#[derive(Debug, Clone)]
pub struct StageLog {
    state: PipelineState,
    stages: Vec<ProcessingStage>,
}

impl Default for StageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl StageLog {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Pending,
            stages: StageName::ALL.iter().map(|s| ProcessingStage::pending(*s)).collect(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stages(&self) -> &[ProcessingStage] {
        &self.stages
    }

    pub fn stage(&self, name: StageName) -> &ProcessingStage {
        &self.stages[name.index()]
    }

    pub fn into_stages(self) -> Vec<ProcessingStage> {
        self.stages
    }

    /// Starts `name`. Its predecessor must have Completed and the run must
    /// not be terminal.
    pub fn begin(&mut self, name: StageName) -> Result<(), TransitionError> {
        let ready = !self.state.is_terminal()
            && self.stage(name).status == StageStatus::Pending
            && name
                .previous()
                .map_or(true, |prev| self.stage(prev).status == StageStatus::Completed);
        if !ready {
            return Err(self.illegal(name, "begin"));
        }

        let stage = &mut self.stages[name.index()];
        stage.status = StageStatus::Running;
        stage.started_at = Some(Utc::now());
        self.state = name.running_state();
        Ok(())
    }

    pub fn complete(&mut self, name: StageName, detail: Option<String>) -> Result<(), TransitionError> {
        self.require_running(name, "complete")?;
        self.stages[name.index()].finish(StageStatus::Completed, detail);
        if name == StageName::Dedupe {
            self.state = PipelineState::Completed;
        }
        Ok(())
    }

    /// Completes `name` without work. Counts as Completed for ordering.
    pub fn skip(&mut self, name: StageName, reason: String) -> Result<(), TransitionError> {
        self.complete(name, Some(reason))?;
        self.stages[name.index()].skipped = true;
        Ok(())
    }

    pub fn fail(&mut self, name: StageName, detail: String) -> Result<(), TransitionError> {
        self.require_running(name, "fail")?;
        self.stages[name.index()].finish(StageStatus::Failed, Some(detail));
        self.state = PipelineState::Failed(name);
        Ok(())
    }

    /// Cancels `name`, whether it is running or was about to start.
    pub fn cancel(&mut self, name: StageName) -> Result<(), TransitionError> {
        let allowed = match self.stage(name).status {
            StageStatus::Running => true,
            StageStatus::Pending => name
                .previous()
                .map_or(true, |prev| self.stage(prev).status == StageStatus::Completed),
            _ => false,
        };
        if self.state.is_terminal() || !allowed {
            return Err(self.illegal(name, "cancel"));
        }
        self.stages[name.index()].finish(StageStatus::Cancelled, None);
        self.state = PipelineState::Cancelled(name);
        Ok(())
    }

    fn require_running(&self, name: StageName, action: &'static str) -> Result<(), TransitionError> {
        if self.state.is_terminal() || self.stage(name).status != StageStatus::Running {
            return Err(self.illegal(name, action));
        }
        Ok(())
    }

    fn illegal(&self, name: StageName, action: &'static str) -> TransitionError {
        TransitionError {
            stage: name,
            action,
            status: self.stage(name).status,
            state: self.state,
        }
    }
}
