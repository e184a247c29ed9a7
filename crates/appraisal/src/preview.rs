//! Bounded-size PNG previews for images and PDFs.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat};
use lopdf::{Document, Object};
use serde::{Deserialize, Serialize};

use crate::config::PreviewConfig;
use crate::error::PreviewError;
use crate::processor::pdf::render_pdf_page_to_image;
use crate::upload::DocumentFormat;

pub const PREVIEW_FILENAME: &str = "preview.png";
pub const PREVIEW_FORMAT: &str = "png";

/// Rendering resolution for PDF pages without an embedded raster.
const PDF_RENDER_DPI: u32 = 72;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Where a stored preview lives, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRef {
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PreviewGenerator {
    max_width: u32,
    max_height: u32,
}

impl PreviewGenerator {
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            max_width: config.max_width.max(1),
            max_height: config.max_height.max(1),
        }
    }

    /// Renders `bytes` to a PNG that fits the configured box. Images
    /// smaller than the box keep their size.
    pub fn generate(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<PreviewImage, PreviewError> {
        let _span = tracing::info_span!("preview.generate", format = %format).entered();

        let source = match format {
            DocumentFormat::Jpeg => decode(bytes, Some(ImageFormat::Jpeg))?,
            DocumentFormat::Png => decode(bytes, Some(ImageFormat::Png))?,
            DocumentFormat::Pdf => self.pdf_source(bytes)?,
            other => return Err(PreviewError::Unsupported(other.mime_type().to_string())),
        };

        self.encode(self.fit(source))
    }

    fn fit(&self, img: DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();
        if width <= self.max_width && height <= self.max_height {
            img
        } else {
            img.thumbnail(self.max_width, self.max_height)
        }
    }

    fn encode(&self, img: DynamicImage) -> Result<PreviewImage, PreviewError> {
        let (width, height) = img.dimensions();
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| PreviewError::Encode(e.to_string()))?;

        Ok(PreviewImage {
            bytes,
            width,
            height,
        })
    }

    /// The first embedded JPEG image, or page 1 rendered by poppler.
    fn pdf_source(&self, bytes: &[u8]) -> Result<DynamicImage, PreviewError> {
        let doc = Document::load_mem(bytes).map_err(|e| PreviewError::Render(e.to_string()))?;

        if let Some(img) = first_embedded_jpeg(&doc) {
            return Ok(img);
        }

        let page = render_pdf_page_to_image(bytes, 1, PDF_RENDER_DPI)
            .map_err(|e| PreviewError::Render(e.to_string()))?;
        decode(&page, Some(ImageFormat::Png))
    }
}

fn decode(bytes: &[u8], format: Option<ImageFormat>) -> Result<DynamicImage, PreviewError> {
    let decoded = match format {
        Some(format) => image::load_from_memory_with_format(bytes, format),
        None => image::load_from_memory(bytes),
    };
    decoded.map_err(|e| PreviewError::Decode(e.to_string()))
}

fn first_embedded_jpeg(doc: &Document) -> Option<DynamicImage> {
    doc.objects.values().find_map(|object| {
        let Object::Stream(stream) = object else {
            return None;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|name| name == b"Image");
        let is_dct = match stream.dict.get(b"Filter") {
            Ok(Object::Name(name)) => name == b"DCTDecode",
            Ok(Object::Array(filters)) => {
                filters.len() == 1 && matches!(&filters[0], Object::Name(n) if n == b"DCTDecode")
            }
            _ => false,
        };
        if !(is_image && is_dct) {
            return None;
        }
        decode(&stream.content, Some(ImageFormat::Jpeg)).ok()
    })
}
