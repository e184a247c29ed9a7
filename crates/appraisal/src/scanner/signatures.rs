//! Built-in byte patterns, compiled once per process.

use std::sync::OnceLock;

use regex::bytes::RegexSet;

/// Chunk size for pattern matching. Consecutive chunks overlap by
/// [`CHUNK_OVERLAP`] so that a match straddling a boundary is still seen.
pub const CHUNK_SIZE: usize = 1024 * 1024;
pub const CHUNK_OVERLAP: usize = 256;

const EICAR: &str = r"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// A named pattern family. `names[i]` labels `set` pattern `i`.
pub struct PatternSet {
    pub names: Vec<&'static str>,
    pub set: RegexSet,
}

impl PatternSet {
    fn build(patterns: &[(&'static str, String)]) -> Self {
        // Byte-oriented matching: content is arbitrary binary, not UTF-8.
        let set = RegexSet::new(patterns.iter().map(|(_, p)| format!("(?-u){}", p)))
            .expect("built-in patterns are valid");
        Self {
            names: patterns.iter().map(|(name, _)| *name).collect(),
            set,
        }
    }

    /// Names of all patterns matching `haystack`.
    pub fn matching<'a>(&'a self, haystack: &[u8]) -> impl Iterator<Item = &'static str> + 'a {
        self.set
            .matches(haystack)
            .into_iter()
            .map(move |i| self.names[i])
    }
}

/// Known malicious payloads, checked in every format.
pub fn malicious() -> &'static PatternSet {
    static SET: OnceLock<PatternSet> = OnceLock::new();
    SET.get_or_init(|| {
        PatternSet::build(&[
            ("eicar-test", regex::escape(EICAR)),
            ("pe-base64", r"TVqQAAMAAAAEAAAA//8AALgAAAAAAAAAQ".to_string()),
            (
                "powershell-encoded",
                r"(?i)powershell(?:\.exe)?\s+(?:-\w+\s+)*-e(?:nc|ncodedcommand)?\s+[A-Za-z0-9+/=]{20,}"
                    .to_string(),
            ),
        ])
    })
}

/// PDF actions that execute or embed content.
pub fn pdf_active() -> &'static PatternSet {
    static SET: OnceLock<PatternSet> = OnceLock::new();
    SET.get_or_init(|| {
        PatternSet::build(&[
            ("pdf-javascript", r"/JavaScript\b".to_string()),
            ("pdf-javascript", r"/JS\b".to_string()),
            ("pdf-launch", r"/Launch\b".to_string()),
            ("pdf-embedded-file", r"/EmbeddedFiles?\b".to_string()),
            ("pdf-rich-media", r"/RichMedia\b".to_string()),
            ("pdf-auto-action", r"/AA\b".to_string()),
        ])
    })
}

/// Markup and script constructs that have no place in delimited text.
pub fn script() -> &'static PatternSet {
    static SET: OnceLock<PatternSet> = OnceLock::new();
    SET.get_or_init(|| {
        PatternSet::build(&[
            ("script-tag", r"(?i)<script\b".to_string()),
            ("javascript-uri", r"(?i)javascript\s*:".to_string()),
            ("vbscript-uri", r"(?i)vbscript\s*:".to_string()),
            ("iframe-tag", r"(?i)<iframe\b".to_string()),
        ])
    })
}

/// Spreadsheet formulas that reach outside the workbook when opened.
pub fn formula_injection() -> &'static PatternSet {
    static SET: OnceLock<PatternSet> = OnceLock::new();
    SET.get_or_init(|| {
        PatternSet::build(&[
            ("formula-cmd", r"(?i)[=+\-@]\s*cmd\s*\|".to_string()),
            ("formula-hyperlink", r"(?i)=\s*HYPERLINK\s*\(".to_string()),
            ("formula-dde", r"(?i)=\s*DDE\s*\(".to_string()),
            ("formula-sum-cmd", r"(?i)@SUM\s*\([^)\n]*cmd".to_string()),
            ("formula-webservice", r"(?i)=\s*WEBSERVICE\s*\(".to_string()),
            ("formula-importxml", r"(?i)=\s*IMPORTXML\s*\(".to_string()),
        ])
    })
}

/// Byte ranges to match, in order. Each window extends past its chunk by
/// the overlap.
pub fn windows(len: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    (0..len.max(1))
        .step_by(CHUNK_SIZE)
        .map(move |start| start..(start + CHUNK_SIZE + CHUNK_OVERLAP).min(len))
}

/// Identifies well-known executable headers at the start of `bytes`.
pub fn executable_header(bytes: &[u8]) -> Option<&'static str> {
    const MACH_O: [[u8; 4]; 4] = [
        [0xFE, 0xED, 0xFA, 0xCE],
        [0xFE, 0xED, 0xFA, 0xCF],
        [0xCE, 0xFA, 0xED, 0xFE],
        [0xCF, 0xFA, 0xED, 0xFE],
    ];

    if bytes.starts_with(b"MZ") {
        Some("pe")
    } else if bytes.starts_with(b"\x7fELF") {
        Some("elf")
    } else if MACH_O.iter().any(|magic| bytes.starts_with(magic)) {
        Some("mach-o")
    } else if bytes.starts_with(b"#!") {
        Some("script")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eicar_matches() {
        let hits: Vec<_> = malicious().matching(EICAR.as_bytes()).collect();
        assert_eq!(hits, vec!["eicar-test"]);
    }

    #[test]
    fn test_pdf_active_patterns() {
        let hits: Vec<_> = pdf_active()
            .matching(b"<< /OpenAction << /S /JavaScript /JS (app.alert(1)) >> >>")
            .collect();
        assert!(hits.contains(&"pdf-javascript"));
        assert!(pdf_active().matching(b"<< /Type /Page >>").next().is_none());
    }

    #[test]
    fn test_formula_patterns() {
        assert!(formula_injection()
            .matching(b"name,total\nx,=cmd|' /C calc'!A0\n")
            .any(|n| n == "formula-cmd"));
        assert!(formula_injection()
            .matching(b"a,=HYPERLINK(\"http://x\")")
            .any(|n| n == "formula-hyperlink"));
        assert!(formula_injection()
            .matching(b"a,b\n1,2\n=3,ordinary")
            .next()
            .is_none());
    }

    #[test]
    fn test_windows_overlap_and_cover() {
        let len = CHUNK_SIZE * 2 + 10;
        let ranges: Vec<_> = windows(len).collect();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], 0..CHUNK_SIZE + CHUNK_OVERLAP);
        assert_eq!(ranges[2], 2 * CHUNK_SIZE..len);
        assert_eq!(windows(0).collect::<Vec<_>>(), vec![0..0]);
    }

    #[test]
    fn test_executable_headers() {
        assert_eq!(executable_header(b"MZ\x90\x00"), Some("pe"));
        assert_eq!(executable_header(b"\x7fELF\x02"), Some("elf"));
        assert_eq!(executable_header(&[0xCF, 0xFA, 0xED, 0xFE, 7]), Some("mach-o"));
        assert_eq!(executable_header(b"#!/bin/sh\n"), Some("script"));
        assert_eq!(executable_header(b"%PDF-1.7"), None);
    }
}
