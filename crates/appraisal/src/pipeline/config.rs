use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, OcrConfig, PreviewConfig, ScannerConfig};

/// Pipeline-specific view of the full configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: String,
    pub storage_root: PathBuf,
    pub ocr: OcrConfig,
    pub scanner: ScannerConfig,
    pub preview: PreviewConfig,
    pub extraction_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            environment: config.environment.clone(),
            storage_root: PathBuf::from(&config.storage_root),
            ocr: config.ocr.clone(),
            scanner: config.scanner,
            preview: config.preview,
            extraction_timeout: Duration::from_secs(config.extraction.timeout_secs),
        }
    }
}
