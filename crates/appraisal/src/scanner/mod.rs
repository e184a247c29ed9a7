//! Integrity scanner: signatures, executable headers, active content and
//! declared-type spoofing, all within a per-megabyte time budget.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScannerConfig;
use crate::pipeline::CancelFlag;
use crate::upload::{DocumentFormat, XLSX_MIME};

pub mod engine;
pub mod signatures;
pub mod workbook;

pub use engine::{EngineError, ThreatEngine};

use signatures::PatternSet;

pub const SCAN_INCOMPLETE: &str = "scan-incomplete";

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Outcome of scanning one upload. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub clean: bool,
    pub threats: Vec<String>,
    pub scanned_at: DateTime<Utc>,
}

impl ScanResult {
    fn from_threats(threats: Vec<Threat>) -> Self {
        let mut labels: Vec<String> = Vec::with_capacity(threats.len());
        for label in threats.iter().map(Threat::label) {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }

        Self {
            clean: labels.is_empty(),
            threats: labels,
            scanned_at: Utc::now(),
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.threats.iter().any(|t| t == SCAN_INCOMPLETE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Threat {
    Signature(String),
    ExecutableHeader(&'static str),
    ActiveContent(&'static str),
    MimeMismatch { declared: String, actual: String },
    DisallowedType(String),
    ScanIncomplete,
}

impl Threat {
    pub fn label(&self) -> String {
        match self {
            Threat::Signature(name) => format!("signature:{}", name),
            Threat::ExecutableHeader(kind) => format!("executable-header:{}", kind),
            Threat::ActiveContent(kind) => format!("active-content:{}", kind),
            Threat::MimeMismatch { declared, actual } => {
                format!("mime-mismatch:declared={},actual={}", declared, actual)
            }
            Threat::DisallowedType(mime) => format!("disallowed-type:{}", mime),
            Threat::ScanIncomplete => SCAN_INCOMPLETE.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct IntegrityScanner {
    budget_ms_per_mb: u64,
    min_budget_ms: u64,
    engine: Option<Arc<dyn ThreatEngine>>,
}

impl std::fmt::Debug for IntegrityScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityScanner")
            .field("budget_ms_per_mb", &self.budget_ms_per_mb)
            .field("min_budget_ms", &self.min_budget_ms)
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

impl IntegrityScanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            budget_ms_per_mb: config.budget_ms_per_mb,
            min_budget_ms: config.min_budget_ms,
            engine: None,
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn ThreatEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Time allowed for `size` bytes: `max(min_budget, per_mb × size_mb)`.
    pub fn budget_for(&self, size: usize) -> Duration {
        let scaled = (self.budget_ms_per_mb as f64 * size as f64 / BYTES_PER_MB).ceil() as u64;
        Duration::from_millis(scaled.max(self.min_budget_ms))
    }

    pub fn scan(&self, bytes: &[u8], declared_mime: &str) -> Result<ScanResult, EngineError> {
        self.scan_with_cancel(bytes, declared_mime, &CancelFlag::new())
    }

    /// Runs every check against `bytes`. Exhausting the time budget or being
    /// cancelled yields an unclean result labelled `scan-incomplete`.
    ///
    /// Only an unreachable external engine is an `Err`.
    pub fn scan_with_cancel(
        &self,
        bytes: &[u8],
        declared_mime: &str,
        cancel: &CancelFlag,
    ) -> Result<ScanResult, EngineError> {
        let deadline = Instant::now() + self.budget_for(bytes.len());
        let format = DocumentFormat::from_mime(declared_mime);
        let mut threats = Vec::new();

        if format.is_none() {
            threats.push(Threat::DisallowedType(declared_mime.trim().to_string()));
        }

        if let Some(kind) = signatures::executable_header(bytes) {
            threats.push(Threat::ExecutableHeader(kind));
        } else if let Some(kind) =
            infer::get(bytes).filter(|k| k.matcher_type() == infer::MatcherType::App)
        {
            threats.push(Threat::ExecutableHeader(kind.extension()));
        }

        if let Some(format) = format {
            if let Some(actual) = sniff_mismatch(bytes, format) {
                threats.push(Threat::MimeMismatch {
                    declared: format.mime_type().to_string(),
                    actual,
                });
            }
        }

        let families = pattern_families(format);
        let mut complete = match_patterns(bytes, &families, deadline, cancel, &mut threats);

        // Workbook cells are compressed; match their decoded text instead.
        if complete && format == Some(DocumentFormat::Xlsx) {
            complete = match workbook::cell_text(bytes, workbook::MAX_INFLATED_BYTES) {
                Ok(text) => {
                    match_patterns(&text, &TABULAR_FAMILIES, deadline, cancel, &mut threats)
                }
                Err(workbook::OverLimit) => false,
            };
        }

        if !complete {
            threats.push(Threat::ScanIncomplete);
            return Ok(ScanResult::from_threats(threats));
        }

        if format == Some(DocumentFormat::Xlsx) && contains_macros(bytes) {
            threats.push(Threat::ActiveContent("macro"));
        }

        if let Some(engine) = &self.engine {
            match engine.inspect(bytes, deadline) {
                Ok(names) => threats.extend(names.into_iter().map(Threat::Signature)),
                Err(EngineError::TimedOut) => threats.push(Threat::ScanIncomplete),
                Err(e) => return Err(e),
            }
        }

        Ok(ScanResult::from_threats(threats))
    }
}

enum Family {
    Malicious,
    PdfActive,
    Script,
    Formula,
}

impl Family {
    fn patterns(&self) -> &'static PatternSet {
        match self {
            Family::Malicious => signatures::malicious(),
            Family::PdfActive => signatures::pdf_active(),
            Family::Script => signatures::script(),
            Family::Formula => signatures::formula_injection(),
        }
    }

    fn threat(&self, name: &'static str) -> Threat {
        match self {
            Family::Malicious => Threat::Signature(name.to_string()),
            _ => Threat::ActiveContent(name),
        }
    }
}

/// Checked against the cell text of every tabular format.
const TABULAR_FAMILIES: [Family; 2] = [Family::Script, Family::Formula];

/// Families matched against the raw bytes.
fn pattern_families(format: Option<DocumentFormat>) -> Vec<Family> {
    let mut families = vec![Family::Malicious];
    match format {
        Some(DocumentFormat::Pdf) => families.push(Family::PdfActive),
        Some(DocumentFormat::Csv | DocumentFormat::Tsv) => families.extend(TABULAR_FAMILIES),
        None => families.push(Family::Script),
        _ => {}
    }
    families
}

/// Returns false when the deadline passed or the run was cancelled before
/// every window was matched.
fn match_patterns(
    bytes: &[u8],
    families: &[Family],
    deadline: Instant,
    cancel: &CancelFlag,
    threats: &mut Vec<Threat>,
) -> bool {
    for window in signatures::windows(bytes.len()) {
        if cancel.is_cancelled() || Instant::now() >= deadline {
            return false;
        }
        let chunk = &bytes[window];
        for family in families {
            for name in family.patterns().matching(chunk) {
                let threat = family.threat(name);
                if !threats.contains(&threat) {
                    threats.push(threat);
                }
            }
        }
    }
    true
}

/// Compares sniffed content against the declared format. Returns the actual
/// type when they disagree.
fn sniff_mismatch(bytes: &[u8], format: DocumentFormat) -> Option<String> {
    let sniffed = infer::get(bytes);

    if format.is_textual() {
        return match sniffed {
            Some(kind) => Some(kind.mime_type().to_string()),
            None if bytes.contains(&0) => Some("application/octet-stream".to_string()),
            None => None,
        };
    }

    let actual = sniffed.map(|k| k.mime_type()).unwrap_or("unknown");
    let accepted: &[&str] = match format {
        DocumentFormat::Xlsx => &[XLSX_MIME, "application/zip"],
        other => &[other.mime_type()],
    };

    (!accepted.contains(&actual)).then(|| actual.to_string())
}

fn contains_macros(bytes: &[u8]) -> bool {
    let Ok(archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return false;
    };
    let has_project = archive
        .file_names()
        .any(|name| name.to_ascii_lowercase().ends_with("vbaproject.bin"));
    has_project
}
