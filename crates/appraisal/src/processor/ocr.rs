use std::io::Cursor;
use std::sync::Arc;

use image::GenericImageView;

use crate::config::OcrConfig;
use crate::error::ProcessError;

#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// 0 to 1.
    pub confidence: f64,
}

/// Turns an image into text. Implementations receive PNG bytes.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, png: &[u8]) -> Result<Recognition, ProcessError>;
}

/// The recognizer selected by configuration, or `None` when OCR is
/// disabled or the binary was built without the `ocr` feature.
pub fn default_recognizer(config: &OcrConfig) -> Option<Arc<dyn TextRecognizer>> {
    if !config.enabled {
        return None;
    }
    built_in_recognizer(config)
}

#[cfg(feature = "ocr")]
fn built_in_recognizer(config: &OcrConfig) -> Option<Arc<dyn TextRecognizer>> {
    Some(Arc::new(TesseractRecognizer::new(&config.languages)))
}

#[cfg(not(feature = "ocr"))]
fn built_in_recognizer(_config: &OcrConfig) -> Option<Arc<dyn TextRecognizer>> {
    tracing::warn!("OCR is enabled in config but this build has no OCR support");
    None
}

/// Re-encodes any decodable image as PNG, the form recognizers accept.
pub fn normalise_to_png(image_data: &[u8]) -> Result<(Vec<u8>, u32, u32), ProcessError> {
    let img = image::load_from_memory(image_data)
        .map_err(|e| ProcessError::ImageProcessing(format!("Failed to load image: {}", e)))?;

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ProcessError::ImageProcessing(format!("Failed to convert image: {}", e)))?;

    let (width, height) = img.dimensions();
    Ok((png, width, height))
}

pub fn language_spec(languages: &[String]) -> String {
    if languages.is_empty() {
        "eng".to_string()
    } else {
        languages.join("+")
    }
}

#[cfg(feature = "ocr")]
pub struct TesseractRecognizer {
    languages: String,
}

#[cfg(feature = "ocr")]
impl TesseractRecognizer {
    pub fn new(languages: &[String]) -> Self {
        Self {
            languages: language_spec(languages),
        }
    }
}

#[cfg(feature = "ocr")]
impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, png: &[u8]) -> Result<Recognition, ProcessError> {
        let _span = tracing::info_span!("processor.ocr").entered();

        let mut lt = leptess::LepTess::new(None, &self.languages).map_err(|e| {
            ProcessError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(png)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| ProcessError::OcrFailed(format!("OCR failed: {}", e)))?;
        let confidence = (lt.mean_text_conf().clamp(0, 100) as f64) / 100.0;

        Ok(Recognition { text, confidence })
    }
}
