//! Builders for fixture documents and configuration.
//!
//! Every fixture is generated in code so tests control exactly which
//! metadata a document carries.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use lopdf::{dictionary, Document, Object, Stream};

use appraisal::config::{
    ExtractionConfig, LimitsConfig, OcrConfig, PreviewConfig, ScannerConfig, ValuationConfig,
};
use appraisal::valuation::ValuationSettings;
use appraisal::{Config, Upload};

pub const TENANT: &str = "t1";
pub const WORKFILE: &str = "wf1";

/// An upload in the default tenant and workfile.
pub fn upload(upload_id: &str, filename: &str, mime: &str, content: Vec<u8>) -> Upload {
    Upload::with_id(upload_id, TENANT, WORKFILE, filename, mime, content)
}

pub fn tenant_upload(
    tenant_id: &str,
    upload_id: &str,
    filename: &str,
    mime: &str,
    content: Vec<u8>,
) -> Upload {
    Upload::with_id(upload_id, tenant_id, WORKFILE, filename, mime, content)
}

/// Relative artifact path for an upload in the default tenant/workfile.
pub fn artifact_path(upload_id: &str, filename: &str) -> String {
    format!("test/{}/{}/{}/{}", TENANT, WORKFILE, upload_id, filename)
}

// ── Images ──

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 120])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .expect("Failed to encode JPEG");
    bytes
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 160, 80]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    bytes
}

/// Inserts an APP1 Exif segment right after SOI.
pub fn with_exif(jpeg: &[u8], payload: &str) -> Vec<u8> {
    let mut segment = b"Exif\0\0".to_vec();
    segment.extend_from_slice(payload.as_bytes());
    let len = (segment.len() + 2) as u16;

    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&segment);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Inserts a tEXt chunk right after IHDR, with a valid CRC.
pub fn with_text_chunk(png: &[u8], keyword: &str, text: &str) -> Vec<u8> {
    const IHDR_END: usize = 8 + 4 + 4 + 13 + 4;

    let mut data = keyword.as_bytes().to_vec();
    data.push(0);
    data.extend_from_slice(text.as_bytes());

    let mut typed = b"tEXt".to_vec();
    typed.extend_from_slice(&data);

    let mut out = png[..IHDR_END].to_vec();
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&typed);
    out.extend_from_slice(&crc32(&typed).to_be_bytes());
    out.extend_from_slice(&png[IHDR_END..]);
    out
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in bytes {
        crc ^= b as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

// ── PDF ──

/// One-page PDF whose only resource is an embedded JPEG. `author` adds an
/// Info dictionary.
pub fn pdf_with_jpeg(jpeg: Vec<u8>, width: u32, height: u32, author: Option<&str>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if let Some(author) = author {
        let info_id = doc.add_object(dictionary! {
            "Author" => Object::string_literal(author),
            "Producer" => Object::string_literal("ScanStation 3000"),
        });
        doc.trailer.set("Info", info_id);
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to save PDF");
    bytes
}

// ── Workbooks ──

/// Minimal single-sheet workbook with inline strings. `creator` adds a
/// docProps/core.xml part.
pub fn xlsx(rows: &[&[&str]], creator: Option<&str>) -> Vec<u8> {
    let mut sheet = String::from("<worksheet><sheetData>");
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            let column = (b'A' + c as u8) as char;
            sheet.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                column,
                r + 1,
                value
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");

    xlsx_with_sheet(&sheet, creator)
}

/// Workbook whose first worksheet is `sheet` verbatim.
pub fn xlsx_with_sheet(sheet: &str, creator: Option<&str>) -> Vec<u8> {
    let mut parts = vec![
        (
            "[Content_Types].xml".to_string(),
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#
                .to_string(),
        ),
        (
            "xl/workbook.xml".to_string(),
            r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Rent Roll" sheetId="1" r:id="rId1"/></sheets></workbook>"#.to_string(),
        ),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#
                .to_string(),
        ),
        ("xl/worksheets/sheet1.xml".to_string(), sheet.to_string()),
    ];
    if let Some(creator) = creator {
        parts.push((
            "docProps/core.xml".to_string(),
            format!(
                r#"<cp:coreProperties xmlns:cp="cp" xmlns:dc="dc"><dc:creator>{}</dc:creator></cp:coreProperties>"#,
                creator
            ),
        ));
    }

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .last_modified_time(zip::DateTime::default());
    for (name, body) in parts {
        writer.start_file(name, options).expect("Failed to start zip entry");
        writer
            .write_all(body.as_bytes())
            .expect("Failed to write zip entry");
    }
    writer
        .finish()
        .expect("Failed to finish workbook")
        .into_inner()
}

// ── Configuration ──

/// Builder for `Config` documents with test-friendly defaults.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            config: Config {
                version: "1.0".to_string(),
                environment: "test".to_string(),
                storage_root: storage_root.to_string_lossy().to_string(),
                database_path: None,
                worker_count: 2,
                limits: LimitsConfig::default(),
                scanner: ScannerConfig::default(),
                ocr: OcrConfig {
                    enabled: false,
                    ..OcrConfig::default()
                },
                extraction: ExtractionConfig::default(),
                preview: PreviewConfig::default(),
                valuation: ValuationConfig {
                    settings: ValuationSettings::default(),
                    fair_band: 0.05,
                    tax_rate_per_thousand: 0.0,
                },
            },
        }
    }

    pub fn environment(mut self, environment: &str) -> Self {
        self.config.environment = environment.to_string();
        self
    }

    pub fn database_path(mut self, path: &Path) -> Self {
        self.config.database_path = Some(path.to_string_lossy().to_string());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn limits(mut self, max_file_bytes: u64, max_submission_bytes: u64) -> Self {
        self.config.limits = LimitsConfig {
            max_file_bytes,
            max_submission_bytes,
        };
        self
    }

    pub fn fair_band(mut self, band: f64) -> Self {
        self.config.valuation.fair_band = band;
        self
    }

    pub fn tax_rate_per_thousand(mut self, rate: f64) -> Self {
        self.config.valuation.tax_rate_per_thousand = rate;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }

    /// Serialises the config to `path` and returns it.
    pub fn write_to(self, path: &Path) -> Config {
        let json = serde_json::to_string_pretty(&self.config).expect("Failed to serialize config");
        std::fs::write(path, json).expect("Failed to write config file");
        self.config
    }
}
