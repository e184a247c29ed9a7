use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{DedupError, StorageError};

use super::state::{PipelineState, TransitionError};

/// Faults that end the whole request rather than one stage. Stage-level
/// problems are reported in the run's stage log instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Artifact storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Deduplication index failed: {0}")]
    Dedup(#[from] DedupError),

    #[error("Threat engine unavailable: {0}")]
    ScannerUnavailable(String),

    #[error("Run log could not be written: {0}")]
    Database(#[from] DatabaseError),

    #[error("Illegal stage transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("Run stopped in non-terminal state {0}")]
    Unfinished(PipelineState),
}
