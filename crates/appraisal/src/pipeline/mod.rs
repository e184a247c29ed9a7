//! Ingestion orchestrator: drives one upload through the stages as an
//! explicit state machine.

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod outcome;
pub mod progress;
pub mod runner;
pub mod state;

pub use cancel::CancelFlag;
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use outcome::{IngestedDocument, PipelineOutcome, PipelineRun};
pub use progress::{BroadcastProgress, NoopProgress, ProgressReporter, StageEvent, StageEventKind};
pub use runner::Pipeline;
pub use state::{PipelineState, ProcessingStage, StageLog, StageName, StageStatus, TransitionError};
