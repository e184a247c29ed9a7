//! Metadata scrubber. Runs after a clean scan and before anything reads
//! the content, so no derived artifact can carry source-device metadata.

use crate::error::ScrubError;
use crate::upload::DocumentFormat;

pub mod document;
pub mod raster;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubOutcome {
    pub bytes: Vec<u8>,
    pub had_metadata: bool,
}

impl ScrubOutcome {
    fn unchanged(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            had_metadata: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataScrubber;

impl MetadataScrubber {
    pub fn new() -> Self {
        Self
    }

    pub fn scrub(&self, bytes: &[u8], format: DocumentFormat) -> Result<ScrubOutcome, ScrubError> {
        let _span = tracing::info_span!("scrub.format", format = %format).entered();

        let outcome = match format {
            DocumentFormat::Jpeg => raster::scrub_jpeg(bytes)?,
            DocumentFormat::Png => raster::scrub_png(bytes)?,
            DocumentFormat::Pdf => document::scrub_pdf(bytes)?,
            DocumentFormat::Xlsx => document::scrub_xlsx(bytes)?,
            DocumentFormat::Csv | DocumentFormat::Tsv => ScrubOutcome::unchanged(bytes),
        };

        tracing::debug!(
            had_metadata = outcome.had_metadata,
            removed_bytes = bytes.len().saturating_sub(outcome.bytes.len()),
            "Scrubbed content"
        );

        Ok(outcome)
    }
}
