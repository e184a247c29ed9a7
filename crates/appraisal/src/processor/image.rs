use std::sync::Arc;

use crate::processor::ocr::{normalise_to_png, TextRecognizer};
use crate::processor::{
    ContentExtractor, ExtractionResult, PageText, Region, TextExtraction,
};
use crate::upload::DocumentFormat;

pub struct ImageExtractor {
    recognizer: Option<Arc<dyn TextRecognizer>>,
}

impl ImageExtractor {
    pub fn new(recognizer: Option<Arc<dyn TextRecognizer>>) -> Self {
        Self { recognizer }
    }

    fn recognise(&self, recognizer: &dyn TextRecognizer, bytes: &[u8]) -> TextExtraction {
        let (png, width, height) = match normalise_to_png(bytes) {
            Ok(normalised) => normalised,
            Err(e) => {
                tracing::warn!(error = %e, "Image could not be decoded for recognition");
                return TextExtraction::empty();
            }
        };

        match recognizer.recognize(&png) {
            Ok(recognition) => TextExtraction::from_pages(vec![PageText {
                page: 1,
                text: recognition.text,
                confidence: recognition.confidence.clamp(0.0, 1.0),
                regions: vec![Region {
                    x: 0.0,
                    y: 0.0,
                    width: width as f64,
                    height: height as f64,
                }],
            }]),
            Err(e) => {
                tracing::warn!(error = %e, "Recognition failed");
                TextExtraction::empty()
            }
        }
    }
}

impl ContentExtractor for ImageExtractor {
    fn extract(&self, bytes: &[u8], _format: DocumentFormat) -> ExtractionResult {
        let _span = tracing::info_span!("processor.image").entered();

        let text = match &self.recognizer {
            Some(recognizer) => self.recognise(recognizer.as_ref(), bytes),
            None => TextExtraction::empty(),
        };

        ExtractionResult::Text(text)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Jpeg | DocumentFormat::Png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::processor::Recognition;
    use std::io::Cursor;

    struct FixedRecognizer(Result<&'static str, &'static str>);

    impl TextRecognizer for FixedRecognizer {
        fn recognize(&self, png: &[u8]) -> Result<Recognition, ProcessError> {
            assert!(png.starts_with(b"\x89PNG"));
            match self.0 {
                Ok(text) => Ok(Recognition {
                    text: text.to_string(),
                    confidence: 0.87,
                }),
                Err(msg) => Err(ProcessError::OcrFailed(msg.to_string())),
            }
        }
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    fn text(result: ExtractionResult) -> TextExtraction {
        match result {
            ExtractionResult::Text(text) => text,
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_supports_image_formats() {
        let extractor = ImageExtractor::new(None);
        assert!(extractor.supports(DocumentFormat::Jpeg));
        assert!(extractor.supports(DocumentFormat::Png));
        assert!(!extractor.supports(DocumentFormat::Pdf));
        assert!(!extractor.supports(DocumentFormat::Csv));
    }

    #[test]
    fn test_recognised_text_with_region() {
        let extractor =
            ImageExtractor::new(Some(Arc::new(FixedRecognizer(Ok("NOI $60,000")))));
        let result = text(extractor.extract(&jpeg(40, 20), DocumentFormat::Jpeg));

        assert_eq!(result.text, "NOI $60,000");
        assert!((result.confidence - 0.87).abs() < 1e-9);
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].regions[0].width, 40.0);
        assert_eq!(result.pages[0].regions[0].height, 20.0);
    }

    #[test]
    fn test_recognizer_failure_is_empty_result() {
        let extractor = ImageExtractor::new(Some(Arc::new(FixedRecognizer(Err("engine crashed")))));
        let result = text(extractor.extract(&jpeg(4, 4), DocumentFormat::Jpeg));
        assert_eq!(result, TextExtraction::empty());
    }

    #[test]
    fn test_undecodable_image_is_empty_result() {
        let extractor = ImageExtractor::new(Some(Arc::new(FixedRecognizer(Ok("x")))));
        let result = text(extractor.extract(b"garbage", DocumentFormat::Png));
        assert_eq!(result.confidence, 0.0);
        assert!(result.text.is_empty());
    }
}
