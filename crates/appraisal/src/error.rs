use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppraisalError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Deduplication index error: {0}")]
    Dedup(#[from] DedupError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Rejected input: {0}")]
    Rejected(#[from] RejectedInput),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Uploads refused before the ingestion pipeline is invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectedInput {
    #[error("File '{filename}' is empty")]
    EmptyFile { filename: String },

    #[error("File '{filename}' is {size} bytes, limit is {limit} bytes")]
    FileTooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },

    #[error("Submission is {total} bytes, limit is {limit} bytes")]
    SubmissionTooLarge { total: u64, limit: u64 },

    #[error("Submission contains no files")]
    EmptySubmission,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("Failed to process spreadsheet: {0}")]
    SpreadsheetProcessing(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Extraction did not finish within {secs}s")]
    TimedOut { secs: u64 },

    #[error("Extraction worker terminated unexpectedly: {0}")]
    WorkerPanicked(String),
}

#[derive(Error, Debug)]
pub enum ScrubError {
    #[error("Malformed JPEG: {0}")]
    MalformedJpeg(String),

    #[error("Malformed PNG: {0}")]
    MalformedPng(String),

    #[error("PDF could not be scrubbed: {0}")]
    Pdf(String),

    #[error("Spreadsheet could not be scrubbed: {0}")]
    Spreadsheet(String),
}

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("Preview generation is not supported for {0}")]
    Unsupported(String),

    #[error("Failed to decode image for preview: {0}")]
    Decode(String),

    #[error("Failed to encode preview: {0}")]
    Encode(String),

    #[error("Failed to render PDF page for preview: {0}")]
    Render(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Invalid storage path segment '{segment}': {reason}")]
    InvalidSegment { segment: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Deduplication index unavailable: {0}")]
    Unavailable(String),

    #[error("Deduplication index database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub type Result<T> = std::result::Result<T, AppraisalError>;
