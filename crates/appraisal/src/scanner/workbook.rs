//! Cell content of an OOXML workbook, decoded for pattern matching.
//!
//! Compressed package bytes hide formulas from the byte patterns, so the
//! shared strings and worksheet parts are inflated and their cell text
//! matched instead. Formulas (`<f>`) are stored without their leading `=`;
//! it is restored so formula patterns apply.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::processor::xlsx::push_reference;

/// Inflated bytes read across all cell parts of one workbook.
pub const MAX_INFLATED_BYTES: u64 = 64 * 1024 * 1024;

/// The cell parts inflate past the allowed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverLimit;

/// Newline-separated text of every `<t>`, `<v>` and `<f>` element in the
/// shared strings and worksheets. A package that is not a readable zip
/// yields no text; the mime checks report it.
pub fn cell_text(bytes: &[u8], limit: u64) -> Result<Vec<u8>, OverLimit> {
    let Ok(mut archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return Ok(Vec::new());
    };
    let parts: Vec<String> = archive
        .file_names()
        .filter(|name| is_cell_part(name))
        .map(String::from)
        .collect();

    let mut remaining = limit;
    let mut text = Vec::new();
    for name in parts {
        let Ok(entry) = archive.by_name(&name) else {
            continue;
        };
        let mut raw = Vec::new();
        // One byte past the budget tells an exact fit from an overflow.
        if entry.take(remaining + 1).read_to_end(&mut raw).is_err() {
            continue;
        }
        if raw.len() as u64 > remaining {
            return Err(OverLimit);
        }
        remaining -= raw.len() as u64;
        collect_cells(&String::from_utf8_lossy(&raw), &mut text);
    }
    Ok(text)
}

fn is_cell_part(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "xl/sharedstrings.xml" || (name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
}

fn collect_cells(xml: &str, out: &mut Vec<u8>) {
    let mut reader = Reader::from_str(xml);
    let mut cell = String::new();
    let mut capture = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"f" => {
                    cell.push('=');
                    capture = true;
                }
                b"t" | b"v" => capture = true,
                _ => {}
            },
            Ok(Event::Text(t)) if capture => cell.push_str(&String::from_utf8_lossy(&t)),
            Ok(Event::GeneralRef(r)) if capture => push_reference(&mut cell, &r),
            Ok(Event::End(e)) if matches!(e.local_name().as_ref(), b"f" | b"t" | b"v") => {
                capture = false;
                out.extend_from_slice(cell.as_bytes());
                out.push(b'\n');
                cell.clear();
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
}
