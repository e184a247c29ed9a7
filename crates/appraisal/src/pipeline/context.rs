use std::sync::Arc;

use crate::dedup::HashRecord;
use crate::preview::PreviewRef;
use crate::processor::ExtractionResult;
use crate::scanner::ScanResult;
use crate::storage::ArtifactPath;
use crate::upload::{DocumentFormat, Upload};

use super::state::StageLog;

pub struct PipelineContext {
    // Input
    pub upload: Upload,
    pub format: Option<DocumentFormat>,
    pub artifact: ArtifactPath,
    pub log: StageLog,

    // Scan result, set even when unclean
    pub scan: Option<ScanResult>,

    // Scrub result, Some only after a clean scan
    pub sanitized: Option<Arc<[u8]>>,
    pub had_metadata: bool,

    pub extraction: Option<ExtractionResult>,
    pub preview: Option<PreviewRef>,

    // Dedupe result and where the sanitized bytes were stored
    pub hash: Option<HashRecord>,
    pub stored_at: Option<String>,
}

impl PipelineContext {
    pub fn new(upload: Upload, artifact: ArtifactPath) -> Self {
        Self {
            format: upload.declared_format(),
            upload,
            artifact,
            log: StageLog::new(),
            scan: None,
            sanitized: None,
            had_metadata: false,
            extraction: None,
            preview: None,
            hash: None,
            stored_at: None,
        }
    }
}
