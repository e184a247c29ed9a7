//! Delimited-text row parser (RFC 4180 quoting).

use crate::processor::{ContentExtractor, ExtractionResult, Row, TabularExtraction};
use crate::upload::DocumentFormat;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub struct DelimitedExtractor;

impl DelimitedExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DelimitedExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for DelimitedExtractor {
    fn extract(&self, bytes: &[u8], format: DocumentFormat) -> ExtractionResult {
        let _span = tracing::info_span!("processor.tabular", format = %format).entered();

        let delimiter = match format {
            DocumentFormat::Tsv => b'\t',
            _ => b',',
        };
        ExtractionResult::Tabular(parse_delimited(bytes, delimiter))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Csv | DocumentFormat::Tsv)
    }
}

/// One record as raw fields, or the reason it could not be read, tagged with
/// the 1-based line it starts on.
struct RawRecord {
    line: usize,
    fields: Result<Vec<Vec<u8>>, &'static str>,
}

/// Parses delimited text. The first non-blank record is the header row.
/// Problem rows are reported in `errors` by the source line they start on,
/// and skipped; parsing continues.
pub fn parse_delimited(bytes: &[u8], delimiter: u8) -> TabularExtraction {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut records = split_records(bytes, delimiter)
        .into_iter()
        .filter(|r| !matches!(&r.fields, Ok(fields) if is_blank(fields)));

    let mut errors = Vec::new();
    let headers = match records.next().map(|r| r.fields) {
        Some(Ok(fields)) => match decode_fields(fields) {
            Some(raw) => normalise_headers(raw, &mut errors),
            None => return TabularExtraction::failed("header row is not valid UTF-8"),
        },
        Some(Err(reason)) => return TabularExtraction::failed(format!("header row {}", reason)),
        None => return TabularExtraction::failed("no header row found"),
    };

    let mut rows = Vec::new();
    for RawRecord { line, fields } in records {
        let fields = match fields {
            Ok(fields) => fields,
            Err(reason) => {
                errors.push(format!("line {}: {}", line, reason));
                continue;
            }
        };
        if fields.len() != headers.len() {
            errors.push(format!(
                "line {}: expected {} fields, found {}",
                line,
                headers.len(),
                fields.len()
            ));
            continue;
        }
        match decode_fields(fields) {
            Some(values) => rows.push(headers.iter().cloned().zip(values).collect::<Row>()),
            None => errors.push(format!("line {}: invalid UTF-8", line)),
        }
    }

    TabularExtraction {
        row_count: rows.len(),
        headers,
        rows,
        errors,
    }
}

/// Trims header names, names empty columns `column_N` and suffixes repeats
/// with `_2`, `_3`, ... so every row key is unique.
pub fn normalise_headers(raw: Vec<String>, errors: &mut Vec<String>) -> Vec<String> {
    let mut headers: Vec<String> = Vec::with_capacity(raw.len());

    for (i, name) in raw.into_iter().enumerate() {
        let name = name.trim();
        let base = if name.is_empty() {
            format!("column_{}", i + 1)
        } else {
            name.to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 2;
        while headers.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        if candidate != base {
            errors.push(format!(
                "duplicate header '{}' renamed to '{}'",
                base, candidate
            ));
        }
        headers.push(candidate);
    }

    headers
}

fn is_blank(fields: &[Vec<u8>]) -> bool {
    fields.iter().all(|f| f.iter().all(u8::is_ascii_whitespace))
}

fn decode_fields(fields: Vec<Vec<u8>>) -> Option<Vec<String>> {
    fields.into_iter().map(|f| String::from_utf8(f).ok()).collect()
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

fn split_records(bytes: &[u8], delimiter: u8) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut fields: Vec<Vec<u8>> = Vec::new();
    let mut field: Vec<u8> = Vec::new();
    let mut state = State::FieldStart;
    let mut line = 1;
    let mut record_line = 1;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            State::Quoted => match b {
                b'"' => state = State::QuoteInQuoted,
                _ => {
                    // Quoted line breaks still advance the source line.
                    if b == b'\n' || (b == b'\r' && bytes.get(i + 1) != Some(&b'\n')) {
                        line += 1;
                    }
                    field.push(b);
                }
            },
            State::QuoteInQuoted => match b {
                b'"' => {
                    field.push(b'"');
                    state = State::Quoted;
                }
                _ if b == delimiter => {
                    fields.push(std::mem::take(&mut field));
                    state = State::FieldStart;
                }
                b'\r' | b'\n' => {
                    fields.push(std::mem::take(&mut field));
                    records.push(RawRecord {
                        line: record_line,
                        fields: Ok(std::mem::take(&mut fields)),
                    });
                    i = skip_line_ending(bytes, i);
                    line += 1;
                    record_line = line;
                    state = State::FieldStart;
                    continue;
                }
                // Lenient: text after a closing quote joins the field.
                _ => {
                    field.push(b);
                    state = State::Unquoted;
                }
            },
            State::FieldStart | State::Unquoted => match b {
                b'"' if state == State::FieldStart => state = State::Quoted,
                _ if b == delimiter => {
                    fields.push(std::mem::take(&mut field));
                    state = State::FieldStart;
                }
                b'\r' | b'\n' => {
                    fields.push(std::mem::take(&mut field));
                    records.push(RawRecord {
                        line: record_line,
                        fields: Ok(std::mem::take(&mut fields)),
                    });
                    i = skip_line_ending(bytes, i);
                    line += 1;
                    record_line = line;
                    state = State::FieldStart;
                    continue;
                }
                _ => {
                    field.push(b);
                    state = State::Unquoted;
                }
            },
        }
        i += 1;
    }

    match state {
        State::Quoted => records.push(RawRecord {
            line: record_line,
            fields: Err("unterminated quoted field"),
        }),
        _ if !field.is_empty() || !fields.is_empty() || state == State::QuoteInQuoted => {
            fields.push(field);
            records.push(RawRecord {
                line: record_line,
                fields: Ok(fields),
            });
        }
        _ => {}
    }

    records
}

/// Index just past a `\n`, `\r\n` or lone `\r` at `i`.
fn skip_line_ending(bytes: &[u8], i: usize) -> usize {
    if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
        i + 2
    } else {
        i + 1
    }
}
