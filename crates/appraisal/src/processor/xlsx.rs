//! First-worksheet reader for OOXML workbooks.

use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::processor::tabular::normalise_headers;
use crate::processor::{ContentExtractor, ExtractionResult, Row, TabularExtraction};
use crate::upload::DocumentFormat;

const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const FALLBACK_SHEET: &str = "xl/worksheets/sheet1.xml";

/// Zero-based index of XFD, the last column a worksheet can address.
const MAX_COLUMN: usize = 16_383;

pub struct XlsxExtractor;

impl XlsxExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for XlsxExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for XlsxExtractor {
    fn extract(&self, bytes: &[u8], _format: DocumentFormat) -> ExtractionResult {
        let _span = tracing::info_span!("processor.xlsx").entered();

        let mut errors = Vec::new();
        let table = match read_first_sheet(bytes, &mut errors) {
            Ok(sheet) => rows_to_table(sheet, errors),
            Err(reason) => {
                tracing::warn!(%reason, "Workbook could not be read");
                TabularExtraction::failed(format!("workbook could not be read: {}", reason))
            }
        };
        ExtractionResult::Tabular(table)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Xlsx)
    }
}

/// One worksheet row as dense cell values.
struct SheetRow {
    /// 1-based row number as shown in the sheet.
    number: usize,
    cells: Vec<String>,
}

fn read_first_sheet(bytes: &[u8], errors: &mut Vec<String>) -> Result<Vec<SheetRow>, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;

    let sheet_path = first_sheet_path(&mut archive).unwrap_or_else(|| FALLBACK_SHEET.to_string());
    let shared = match read_entry(&mut archive, SHARED_STRINGS) {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet = read_entry(&mut archive, &sheet_path)
        .ok_or_else(|| format!("worksheet '{}' not found", sheet_path))?;

    parse_sheet(&sheet, &shared, errors)
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut raw = Vec::new();
    entry.read_to_end(&mut raw).ok()?;
    Some(String::from_utf8_lossy(&raw).into_owned())
}

/// Resolves the first `<sheet>` of the workbook through its relationship.
fn first_sheet_path(archive: &mut zip::ZipArchive<Cursor<&[u8]>>) -> Option<String> {
    let workbook = read_entry(archive, WORKBOOK)?;
    let rels = read_entry(archive, WORKBOOK_RELS)?;

    let rel_id = first_element_attr(&workbook, b"sheet", b"id")?;

    let mut reader = Reader::from_str(&rels);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if attr(&e, b"Id").as_deref() == Some(rel_id.as_str()) {
                    let target = attr(&e, b"Target")?;
                    return Some(match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    });
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn first_element_attr(xml: &str, element: &[u8], key: &[u8]) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == element => {
                return attr(&e, key);
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Attribute value by local name (`r:id` matches `id`), entities resolved.
fn attr(element: &BytesStart, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .map(|a| unescape_lossy(&a.value))
}

fn unescape_lossy(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match quick_xml::escape::unescape(&text) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => text.into_owned(),
    }
}

/// Appends an entity reference (`&amp;`, `&#38;`) reported outside text.
pub(crate) fn push_reference(target: &mut String, name: &[u8]) {
    let reference = format!("&{};", String::from_utf8_lossy(name));
    target.push_str(&unescape_lossy(reference.as_bytes()));
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs (<rPh>) are annotations, not cell content.
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = phonetic_depth == 0,
                b"rPh" => phonetic_depth += 1,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(t)) if in_text => current.push_str(&String::from_utf8_lossy(&t)),
            Ok(Event::GeneralRef(r)) if in_text => push_reference(&mut current, &r),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("shared strings: {}", e)),
            _ => {}
        }
    }

    Ok(strings)
}

#[derive(Default)]
struct Cell {
    reference: Option<String>,
    kind: Option<String>,
    value: String,
}

/// Parses sheet rows. Cells that cannot be placed are reported in `errors`
/// and dropped; the rest of their row is kept.
fn parse_sheet(
    xml: &str,
    shared: &[String],
    errors: &mut Vec<String>,
) -> Result<Vec<SheetRow>, String> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<SheetRow> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut row_number = 0;
    let mut cell: Option<Cell> = None;
    let mut capture = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    row_number = next_row_number(&e, row_number);
                }
                b"c" => {
                    cell = Some(Cell {
                        reference: attr(&e, b"r"),
                        kind: attr(&e, b"t"),
                        value: String::new(),
                    })
                }
                b"v" | b"t" => capture = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => {
                row_number = next_row_number(&e, row_number);
                rows.push(SheetRow {
                    number: row_number,
                    cells: Vec::new(),
                });
            }
            Ok(Event::Text(t)) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::GeneralRef(r)) if capture => {
                if let Some(c) = cell.as_mut() {
                    push_reference(&mut c.value, &r);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        if let Err(reason) = place_cell(&mut row, c, shared) {
                            errors.push(format!("row {}: {}", row_number, reason));
                        }
                    }
                }
                b"row" => rows.push(SheetRow {
                    number: row_number,
                    cells: std::mem::take(&mut row),
                }),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("worksheet: {}", e)),
            _ => {}
        }
    }

    Ok(rows)
}

/// The `r` attribute of a `<row>`, or the row after `previous`.
fn next_row_number(element: &BytesStart, previous: usize) -> usize {
    attr(element, b"r")
        .and_then(|r| r.trim().parse().ok())
        .unwrap_or(previous + 1)
}

fn place_cell(row: &mut Vec<String>, cell: Cell, shared: &[String]) -> Result<(), String> {
    let column = match cell.reference.as_deref().and_then(column_index) {
        Some(column) => column,
        None => row.len(),
    };
    if column > MAX_COLUMN {
        return Err(match cell.reference {
            Some(reference) => format!("cell {} is beyond column XFD", reference),
            None => "cell is beyond column XFD".to_string(),
        });
    }

    let value = match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.value.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        _ => cell.value,
    };

    if row.len() <= column {
        row.resize(column + 1, String::new());
    }
    row[column] = value;
    Ok(())
}

/// Zero-based column of an A1-style reference (`"C7"` is 2). Saturates
/// instead of overflowing, so oversized references stay out of range.
fn column_index(reference: &str) -> Option<usize> {
    let mut number = 0usize;
    let mut letters = 0;
    for c in reference.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        number = number.saturating_mul(26).saturating_add(digit);
        letters += 1;
    }
    (letters > 0).then(|| number - 1)
}

fn rows_to_table(sheet: Vec<SheetRow>, mut errors: Vec<String>) -> TabularExtraction {
    let mut rows_iter = sheet
        .into_iter()
        .filter(|r| !r.cells.iter().all(|v| v.trim().is_empty()));

    let headers = match rows_iter.next() {
        Some(raw) => normalise_headers(raw.cells, &mut errors),
        None => {
            errors.push("no header row found".to_string());
            return TabularExtraction {
                errors,
                ..TabularExtraction::default()
            };
        }
    };

    let mut rows = Vec::new();
    for SheetRow {
        number,
        cells: mut values,
    } in rows_iter
    {
        let last_filled = values.iter().rposition(|v| !v.trim().is_empty()).unwrap_or(0);
        if last_filled >= headers.len() {
            errors.push(format!(
                "row {}: expected {} fields, found {}",
                number,
                headers.len(),
                last_filled + 1
            ));
            continue;
        }
        // Spreadsheets omit trailing empty cells.
        values.resize(headers.len(), String::new());
        rows.push(headers.iter().cloned().zip(values).collect::<Row>());
    }

    TabularExtraction {
        row_count: rows.len(),
        headers,
        rows,
        errors,
    }
}
