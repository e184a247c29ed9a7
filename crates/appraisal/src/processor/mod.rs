pub mod image;
pub mod ocr;
pub mod pdf;
pub mod tabular;
pub mod xlsx;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::OcrConfig;
use crate::error::ProcessError;
use crate::upload::DocumentFormat;

pub use ocr::{Recognition, TextRecognizer};

/// Below this, recognised text is advisory only.
pub const LOW_CONFIDENCE: f64 = 0.5;

/// Content extracted from one upload. The shape follows the format: text for
/// images and PDFs, rows for delimited files and workbooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionResult {
    Text(TextExtraction),
    Tabular(TabularExtraction),
}

impl ExtractionResult {
    /// Low-confidence text or row-level parse problems. Advisory only.
    pub fn is_degraded(&self) -> bool {
        match self {
            ExtractionResult::Text(text) => text.confidence < LOW_CONFIDENCE,
            ExtractionResult::Tabular(table) => !table.errors.is_empty(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ExtractionResult::Text(text) => format!(
                "{} characters across {} page(s), confidence {:.2}{}",
                text.text.chars().count(),
                text.pages.len(),
                text.confidence,
                if self.is_degraded() { " (low)" } else { "" }
            ),
            ExtractionResult::Tabular(table) => format!(
                "{} row(s), {} column(s), {} parse error(s)",
                table.row_count,
                table.headers.len(),
                table.errors.len()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextExtraction {
    pub text: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageText>,
}

impl TextExtraction {
    /// The result for malformed or unreadable input.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pages(pages: Vec<PageText>) -> Self {
        let confidence = if pages.is_empty() {
            0.0
        } else {
            pages.iter().map(|p| p.confidence).sum::<f64>() / pages.len() as f64
        };
        let text = pages
            .iter()
            .map(|p| p.text.trim_end())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            text,
            confidence,
            pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page: u32,
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub regions: Vec<Region>,
}

/// Bounding box in the unit of its source: PDF points or image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularExtraction {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub errors: Vec<String>,
}

impl TabularExtraction {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Self::default()
        }
    }
}

/// Extraction never fails through the error channel: malformed input yields
/// an empty or degraded result.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], format: DocumentFormat) -> ExtractionResult;
    fn supports(&self, format: DocumentFormat) -> bool;
}

pub struct ProcessorRegistry {
    extractors: Vec<Box<dyn ContentExtractor>>,
}

impl ProcessorRegistry {
    pub fn new(recognizer: Option<Arc<dyn TextRecognizer>>, dpi: u32) -> Self {
        let extractors: Vec<Box<dyn ContentExtractor>> = vec![
            Box::new(tabular::DelimitedExtractor::new()),
            Box::new(xlsx::XlsxExtractor::new()),
            Box::new(image::ImageExtractor::new(recognizer.clone())),
            Box::new(pdf::PdfExtractor::new(recognizer, dpi)),
        ];

        Self { extractors }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(ocr::default_recognizer(config), config.dpi)
    }

    pub fn extract(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<ExtractionResult, ProcessError> {
        self.extractors
            .iter()
            .find(|e| e.supports(format))
            .map(|e| e.extract(bytes, format))
            .ok_or_else(|| ProcessError::UnsupportedFormat(format.to_string()))
    }
}

/// Checks a tabular result against the headers a caller needs. One error per
/// missing header, plus one if no data rows were parsed.
///
/// Header names are compared case-insensitively, ignoring spaces,
/// underscores, hyphens and dots.
pub fn validate_rows(result: &TabularExtraction, required_headers: &[&str]) -> Vec<String> {
    let present: Vec<String> = result.headers.iter().map(|h| normalise_header(h)).collect();

    let mut errors: Vec<String> = required_headers
        .iter()
        .filter(|required| !present.contains(&normalise_header(required)))
        .map(|required| format!("missing required header '{}'", required))
        .collect();

    if result.rows.is_empty() {
        errors.push("no data rows parsed".to_string());
    }
    errors
}

fn normalise_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '-' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}
