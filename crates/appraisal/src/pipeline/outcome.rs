use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::HashRecord;
use crate::preview::PreviewRef;
use crate::processor::ExtractionResult;
use crate::scanner::ScanResult;

use super::state::{PipelineState, ProcessingStage, StageName};

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedDocument {
    #[serde(skip, default = "no_bytes")]
    pub sanitized: Arc<[u8]>,
    pub had_metadata: bool,
    pub extraction: ExtractionResult,
    pub preview: Option<PreviewRef>,
    pub hash: HashRecord,
    /// Artifact path of the sanitized bytes.
    pub stored_at: String,
}

fn no_bytes() -> Arc<[u8]> {
    Arc::from(Vec::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed(Box<IngestedDocument>),
    Failed { stage: StageName, detail: String },
    Cancelled { stage: StageName },
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineOutcome::Completed(_))
    }

    pub fn document(&self) -> Option<&IngestedDocument> {
        match self {
            PipelineOutcome::Completed(doc) => Some(doc),
            _ => None,
        }
    }
}

/// A finished run: the stage log verbatim plus its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub upload_id: String,
    pub tenant_id: String,
    pub workfile_id: String,
    pub filename: String,
    pub declared_mime: String,
    pub state: PipelineState,
    pub stages: Vec<ProcessingStage>,
    pub scan: Option<ScanResult>,
    pub outcome: PipelineOutcome,
    pub finished_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn stage(&self, name: StageName) -> Option<&ProcessingStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn document(&self) -> Option<&IngestedDocument> {
        self.outcome.document()
    }

    pub fn extraction(&self) -> Option<&ExtractionResult> {
        self.document().map(|d| &d.extraction)
    }

    pub fn hash(&self) -> Option<&HashRecord> {
        self.document().map(|d| &d.hash)
    }

    pub fn is_duplicate(&self) -> bool {
        self.hash().is_some_and(|h| h.is_duplicate)
    }
}
