use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use lopdf::{Document, Object, ObjectId};

use crate::error::ProcessError;
use crate::processor::ocr::{normalise_to_png, TextRecognizer};
use crate::processor::{ContentExtractor, ExtractionResult, PageText, Region, TextExtraction};
use crate::upload::DocumentFormat;

/// Confidence assigned to embedded text by its apparent quality.
const READABLE_CONFIDENCE: f64 = 0.95;
const GARBLED_CONFIDENCE: f64 = 0.2;

/// Pattern for Identity-H Unimplemented errors (common with CID fonts).
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Text shorter than this is considered readable regardless of composition.
const MIN_TOTAL_CHARS: usize = 50;

/// Below this share of alphanumeric characters, text is treated as garbled.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

const MAX_PARENT_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextQuality {
    Empty,
    Garbled,
    Readable,
}

impl TextQuality {
    pub fn assess(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return TextQuality::Empty;
        }

        let cleaned = trimmed
            .replace(IDENTITY_H_PATTERN, "")
            .replace(['\n', ' '], "");
        if cleaned.is_empty() {
            return TextQuality::Empty;
        }

        // chars().count() rather than len() so non-ASCII text is measured correctly
        let total_chars = trimmed.chars().count();
        let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();

        if total_chars > MIN_TOTAL_CHARS
            && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT
        {
            return TextQuality::Garbled;
        }

        TextQuality::Readable
    }

    pub fn confidence(&self) -> f64 {
        match self {
            TextQuality::Empty => 0.0,
            TextQuality::Garbled => GARBLED_CONFIDENCE,
            TextQuality::Readable => READABLE_CONFIDENCE,
        }
    }
}

pub struct PdfExtractor {
    recognizer: Option<Arc<dyn TextRecognizer>>,
    dpi: u32,
}

impl PdfExtractor {
    pub fn new(recognizer: Option<Arc<dyn TextRecognizer>>, dpi: u32) -> Self {
        Self { recognizer, dpi }
    }

    fn extract_pages(&self, pdf_bytes: &[u8], doc: &Document) -> Vec<PageText> {
        doc.get_pages()
            .into_iter()
            .map(|(page_num, page_id)| {
                let text = doc.extract_text(&[page_num]).unwrap_or_default();
                let quality = TextQuality::assess(&text);

                let mut page = PageText {
                    page: page_num,
                    confidence: quality.confidence(),
                    text: if quality == TextQuality::Readable {
                        text
                    } else {
                        String::new()
                    },
                    regions: media_box(doc, page_id).into_iter().collect(),
                };

                if quality != TextQuality::Readable {
                    if let Some(recognized) = self.recognise_page(pdf_bytes, page_num) {
                        if recognized.confidence > page.confidence {
                            page.text = recognized.text;
                            page.confidence = recognized.confidence;
                        }
                    }
                }
                page
            })
            .collect()
    }

    fn recognise_page(&self, pdf_bytes: &[u8], page_num: u32) -> Option<RecognizedPage> {
        let recognizer = self.recognizer.as_ref()?;
        let _ocr_span = tracing::info_span!("processor.ocr_fallback", page = page_num).entered();

        let rendered = render_pdf_page_to_image(pdf_bytes, page_num, self.dpi)
            .and_then(|image| normalise_to_png(&image))
            .and_then(|(png, _, _)| recognizer.recognize(&png));

        match rendered {
            Ok(recognition) => Some(RecognizedPage {
                text: recognition.text,
                confidence: recognition.confidence.clamp(0.0, 1.0),
            }),
            Err(e) => {
                tracing::warn!(page = page_num, error = %e, "Page recognition failed");
                None
            }
        }
    }
}

struct RecognizedPage {
    text: String,
    confidence: f64,
}

impl ContentExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8], _format: DocumentFormat) -> ExtractionResult {
        let _span = tracing::info_span!("processor.pdf").entered();

        let pages = match Document::load_mem(bytes) {
            Ok(doc) => self.extract_pages(bytes, &doc),
            Err(e) => {
                // Uploads reach extraction only after the scrubber parsed them.
                tracing::warn!(error = %e, "lopdf failed to parse PDF");
                Vec::new()
            }
        };

        ExtractionResult::Text(TextExtraction::from_pages(pages))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pdf)
    }
}

/// The page's MediaBox, inherited from the page tree when the page has none.
fn media_box(doc: &Document, page_id: ObjectId) -> Option<Region> {
    let mut dict = doc.get_dictionary(page_id).ok()?;

    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(bounds) = dict.get(b"MediaBox").and_then(Object::as_array) {
            let numbers: Vec<f64> = bounds.iter().filter_map(number).collect();
            return match numbers[..] {
                [x0, y0, x1, y1] => Some(Region {
                    x: x0.min(x1),
                    y: y0.min(y1),
                    width: (x1 - x0).abs(),
                    height: (y1 - y0).abs(),
                }),
                _ => None,
            };
        }
        let parent = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(*value as f64),
        _ => None,
    }
}

/// A scratch copy of the PDF for poppler tools, removed on drop.
struct ScratchPdf(PathBuf);

impl ScratchPdf {
    fn write(pdf_bytes: &[u8]) -> Result<Self, ProcessError> {
        let path = std::env::temp_dir().join(format!("appraisal_{}.pdf", uuid::Uuid::new_v4()));
        std::fs::write(&path, pdf_bytes)
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchPdf {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Renders one page to PNG with pdftoppm (poppler-utils).
pub fn render_pdf_page_to_image(
    pdf_bytes: &[u8],
    page_num: u32,
    dpi: u32,
) -> Result<Vec<u8>, ProcessError> {
    let scratch = ScratchPdf::write(pdf_bytes)?;
    let output_prefix =
        std::env::temp_dir().join(format!("appraisal_page_{}", uuid::Uuid::new_v4()));

    let output = Command::new("pdftoppm")
        .args([
            "-png",
            "-r",
            &dpi.to_string(),
            "-f",
            &page_num.to_string(),
            "-l",
            &page_num.to_string(),
        ])
        .arg(scratch.path())
        .arg(&output_prefix)
        .output()
        .map_err(|e| {
            ProcessError::PdfProcessing(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm zero-pads the page suffix to the width of the page count
    let prefix = output_prefix.display();
    let candidates = [
        format!("{}-{}.png", prefix, page_num),
        format!("{}-{:02}.png", prefix, page_num),
        format!("{}-{:03}.png", prefix, page_num),
    ];
    let image_path = candidates
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .ok_or_else(|| {
            ProcessError::PdfProcessing("Failed to find rendered page image".to_string())
        })?;

    let image_data = std::fs::read(image_path).map_err(|e| {
        ProcessError::PdfProcessing(format!("Failed to read rendered image: {}", e))
    })?;
    let _ = std::fs::remove_file(image_path);

    Ok(image_data)
}
