pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod preview;
pub mod processor;
pub mod sanitize;
pub mod scanner;
pub mod scrub;
pub mod storage;
pub mod upload;
pub mod valuation;
pub mod worker;

pub use config::{load_config, load_config_from_str, Config};
pub use dedup::{ContentDigest, DedupIndex, HashRecord, MemoryDedupIndex, SqliteDedupIndex};
pub use error::{
    AppraisalError, ConfigError, DedupError, PreviewError, ProcessError, RejectedInput, Result,
    ScrubError, StorageError, WorkerError,
};
pub use pipeline::{
    CancelFlag, Pipeline, PipelineConfig, PipelineOutcome, PipelineRun, PipelineState, StageName,
};
pub use processor::{validate_rows, ExtractionResult, ProcessorRegistry};
pub use scanner::{IntegrityScanner, ScanResult};
pub use scrub::MetadataScrubber;
pub use storage::{ArtifactPath, ArtifactStore};
pub use upload::{DocumentFormat, Submission, Upload};
pub use valuation::{value_property, ValuationRequest, ValuationResponse};
pub use worker::WorkerPool;
