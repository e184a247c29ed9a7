use std::io::Cursor;

use lopdf::{Document, Object, ObjectId};

use super::ScrubOutcome;
use crate::error::ScrubError;

/// OOXML package parts that carry author, company and timestamp fields.
const XLSX_METADATA_PARTS: [&str; 3] = [
    "docprops/core.xml",
    "docprops/app.xml",
    "docprops/custom.xml",
];

/// Removes the document information dictionary, the file identifier and
/// every XMP `Metadata` stream, then re-serialises the document.
///
/// Unreferenced objects are pruned and the rest renumbered from 1, so two
/// files that differ only in removed metadata serialise identically.
pub fn scrub_pdf(bytes: &[u8]) -> Result<ScrubOutcome, ScrubError> {
    let mut doc = Document::load_mem(bytes).map_err(|e| ScrubError::Pdf(e.to_string()))?;
    let mut had_metadata = false;

    if let Some(info) = doc.trailer.remove(b"Info") {
        had_metadata = true;
        if let Ok(id) = info.as_reference() {
            doc.objects.remove(&id);
        }
    }
    // The file identifier is not descriptive metadata but does fingerprint
    // the producing tool.
    doc.trailer.remove(b"ID");

    let mut metadata_streams: Vec<ObjectId> = Vec::new();
    for object in doc.objects.values_mut() {
        let dict = match object {
            Object::Dictionary(dict) => dict,
            Object::Stream(stream) => &mut stream.dict,
            _ => continue,
        };
        if let Some(removed) = dict.remove(b"Metadata") {
            had_metadata = true;
            if let Ok(id) = removed.as_reference() {
                metadata_streams.push(id);
            }
        }
    }
    for id in metadata_streams {
        doc.objects.remove(&id);
    }
    doc.prune_objects();
    doc.renumber_objects();

    let mut out = Vec::with_capacity(bytes.len());
    doc.save_to(&mut out)
        .map_err(|e| ScrubError::Pdf(e.to_string()))?;

    Ok(ScrubOutcome {
        bytes: out,
        had_metadata,
    })
}

/// Rewrites the package without its document property parts. Remaining
/// entries are copied compressed, untouched.
pub fn scrub_xlsx(bytes: &[u8]) -> Result<ScrubOutcome, ScrubError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ScrubError::Spreadsheet(e.to_string()))?;
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::with_capacity(bytes.len())));
    let mut had_metadata = false;

    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| ScrubError::Spreadsheet(e.to_string()))?;

        let name = entry.name().to_ascii_lowercase();
        if XLSX_METADATA_PARTS.contains(&name.as_str()) {
            had_metadata = true;
            continue;
        }

        writer
            .raw_copy_file(entry)
            .map_err(|e| ScrubError::Spreadsheet(e.to_string()))?;
    }

    let out = writer
        .finish()
        .map_err(|e| ScrubError::Spreadsheet(e.to_string()))?
        .into_inner();

    Ok(ScrubOutcome {
        bytes: out,
        had_metadata,
    })
}
