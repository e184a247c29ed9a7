use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::LimitsConfig;
use crate::error::RejectedInput;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// The document types the intake pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Jpeg,
    Png,
    Pdf,
    Csv,
    Tsv,
    Xlsx,
}

impl DocumentFormat {
    /// Maps a declared mime type (parameters and case ignored) onto a format.
    /// Returns `None` for anything outside the allow-list.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" | "image/x-png" => Some(Self::Png),
            "application/pdf" | "application/x-pdf" => Some(Self::Pdf),
            "text/csv" | "application/csv" | "text/comma-separated-values" => Some(Self::Csv),
            "text/tab-separated-values" | "text/tsv" => Some(Self::Tsv),
            XLSX_MIME => Some(Self::Xlsx),
            _ => None,
        }
    }

    /// Guesses the format from a filename extension, for callers that have no
    /// declared mime type.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let guess = mime_guess::from_path(filename).first_raw()?;
        Self::from_mime(guess).or_else(|| {
            let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
            match ext.as_str() {
                "tsv" | "tab" => Some(Self::Tsv),
                _ => None,
            }
        })
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv",
            Self::Tsv => "text/tab-separated-values",
            Self::Xlsx => XLSX_MIME,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Xlsx => "xlsx",
        }
    }

    /// Delimited or spreadsheet formats that yield rows rather than text.
    pub fn is_tabular(&self) -> bool {
        matches!(self, Self::Csv | Self::Tsv | Self::Xlsx)
    }

    /// Plain-text formats; these must never sniff as binary content.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Csv | Self::Tsv)
    }

    pub fn supports_preview(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png | Self::Pdf)
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One submitted file. Content is shared, never mutated.
#[derive(Debug, Clone)]
pub struct Upload {
    pub tenant_id: String,
    pub workfile_id: String,
    pub upload_id: String,
    pub filename: String,
    pub declared_mime: String,
    content: Arc<[u8]>,
}

impl Upload {
    pub fn new(
        tenant_id: impl Into<String>,
        workfile_id: impl Into<String>,
        filename: impl Into<String>,
        declared_mime: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            tenant_id,
            workfile_id,
            filename,
            declared_mime,
            content,
        )
    }

    pub fn with_id(
        upload_id: impl Into<String>,
        tenant_id: impl Into<String>,
        workfile_id: impl Into<String>,
        filename: impl Into<String>,
        declared_mime: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            workfile_id: workfile_id.into(),
            upload_id: upload_id.into(),
            filename: filename.into(),
            declared_mime: declared_mime.into(),
            content: content.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.content
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.content)
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// The allow-listed format implied by the declared mime type.
    pub fn declared_format(&self) -> Option<DocumentFormat> {
        DocumentFormat::from_mime(&self.declared_mime)
    }
}

impl LimitsConfig {
    /// Checks a single upload against the per-file limit.
    pub fn admit(&self, upload: &Upload) -> Result<(), RejectedInput> {
        if upload.size() == 0 {
            return Err(RejectedInput::EmptyFile {
                filename: upload.filename.clone(),
            });
        }
        if upload.size() > self.max_file_bytes {
            return Err(RejectedInput::FileTooLarge {
                filename: upload.filename.clone(),
                size: upload.size(),
                limit: self.max_file_bytes,
            });
        }
        Ok(())
    }
}

/// A batch of uploads that passed the size gate.
#[derive(Debug, Clone)]
pub struct Submission {
    uploads: Vec<Upload>,
}

impl Submission {
    pub fn new(uploads: Vec<Upload>, limits: &LimitsConfig) -> Result<Self, RejectedInput> {
        if uploads.is_empty() {
            return Err(RejectedInput::EmptySubmission);
        }

        let mut total: u64 = 0;
        for upload in &uploads {
            limits.admit(upload)?;
            total = total.saturating_add(upload.size());
        }

        if total > limits.max_submission_bytes {
            return Err(RejectedInput::SubmissionTooLarge {
                total,
                limit: limits.max_submission_bytes,
            });
        }

        Ok(Self { uploads })
    }

    pub fn total_bytes(&self) -> u64 {
        self.uploads.iter().map(Upload::size).sum()
    }

    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }

    pub fn uploads(&self) -> &[Upload] {
        &self.uploads
    }

    pub fn into_uploads(self) -> Vec<Upload> {
        self.uploads
    }
}
