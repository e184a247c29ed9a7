use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::state::{PipelineState, StageName};

/// Events emitted by the pipeline during processing. Extracted content is
/// never carried on events.
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub upload_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: StageEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEventKind {
    Started { stage: StageName },
    Completed { stage: StageName, detail: Option<String> },
    Skipped { stage: StageName, reason: String },
    Failed { stage: StageName, detail: String },
    Cancelled { stage: StageName },
    Finished { state: PipelineState },
}

impl StageEvent {
    pub fn new(upload_id: &str, kind: StageEventKind) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            at: Utc::now(),
            kind,
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: StageEvent);
}

/// No-op reporter for unit tests and the CLI.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: StageEvent) {}
}

/// Fans events out to any number of subscribers.
#[derive(Clone)]
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<StageEvent>>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn from_sender(sender: Arc<broadcast::Sender<StageEvent>>) -> Self {
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: StageEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
