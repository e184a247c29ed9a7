//! Test harness for isolated pipeline execution.
//!
//! Each harness owns a temporary artifact root and an in-memory dedup index,
//! so runs in one test never see another test's uploads.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use appraisal::config::{OcrConfig, PreviewConfig, ScannerConfig};
use appraisal::pipeline::NoopProgress;
use appraisal::{CancelFlag, MemoryDedupIndex, Pipeline, PipelineConfig, PipelineRun, Upload};

pub const ENVIRONMENT: &str = "test";

pub struct TestHarness {
    temp_dir: TempDir,
    pub storage_root: PathBuf,
    pub dedup: Arc<MemoryDedupIndex>,
    pipeline: Arc<Pipeline>,
}

impl TestHarness {
    /// Harness with OCR disabled and default scanner/preview settings.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Harness whose pipeline config is adjusted before construction.
    pub fn with_config(adjust: impl FnOnce(&mut PipelineConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage_root = temp_dir.path().join("artifacts");

        let mut config = PipelineConfig {
            environment: ENVIRONMENT.to_string(),
            storage_root: storage_root.clone(),
            ocr: OcrConfig {
                enabled: false,
                ..OcrConfig::default()
            },
            scanner: ScannerConfig::default(),
            preview: PreviewConfig::default(),
            extraction_timeout: Duration::from_secs(60),
        };
        adjust(&mut config);

        let dedup = Arc::new(MemoryDedupIndex::new());
        let pipeline = Pipeline::from_config(Arc::new(config), dedup.clone()).with_recognizer(None);

        Self {
            temp_dir,
            storage_root,
            dedup,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Runs one upload to completion, panicking on infrastructure faults.
    pub fn process(&self, upload: Upload) -> PipelineRun {
        self.pipeline
            .process(upload, &CancelFlag::new(), &NoopProgress)
            .expect("pipeline infrastructure fault")
    }

    /// Filesystem location of an artifact path such as `test/t1/wf1/u1/a.csv`.
    pub fn artifact(&self, relative: &str) -> PathBuf {
        self.storage_root.join(relative)
    }

    pub fn artifact_exists(&self, relative: &str) -> bool {
        self.artifact(relative).exists()
    }

    pub fn read_artifact(&self, relative: &str) -> Vec<u8> {
        std::fs::read(self.artifact(relative)).expect("Failed to read artifact")
    }

    /// Every file under the artifact root, relative to it.
    pub fn stored_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.storage_root, &self.storage_root, &mut files);
        files.sort();
        files
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}
