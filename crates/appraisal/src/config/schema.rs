use serde::{Deserialize, Serialize};

use crate::valuation::{ConfidenceBounds, ReconciliationPolicy, ValuationSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Leading segment of every artifact path (`prod`, `staging`, ...).
    pub environment: String,
    pub storage_root: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    pub valuation: ValuationConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_submission_bytes")]
    pub max_submission_bytes: u64,
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_max_submission_bytes() -> u64 {
    200 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_submission_bytes: default_max_submission_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_budget_ms_per_mb")]
    pub budget_ms_per_mb: u64,
    #[serde(default = "default_min_budget_ms")]
    pub min_budget_ms: u64,
}

fn default_budget_ms_per_mb() -> u64 {
    250
}

fn default_min_budget_ms() -> u64 {
    1_000
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            budget_ms_per_mb: default_budget_ms_per_mb(),
            min_budget_ms: default_min_budget_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: default_languages(),
            dpi: default_dpi(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

fn default_extraction_timeout() -> u64 {
    120
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_extraction_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_edge")]
    pub max_width: u32,
    #[serde(default = "default_preview_edge")]
    pub max_height: u32,
}

fn default_preview_edge() -> u32 {
    512
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_width: default_preview_edge(),
            max_height: default_preview_edge(),
        }
    }
}

/// Valuation tuning. `fair_band` has no default: the FAIR/OVER/UNDER
/// threshold must always be chosen by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationConfig {
    #[serde(flatten)]
    pub settings: ValuationSettings,
    pub fair_band: f64,
    #[serde(default)]
    pub tax_rate_per_thousand: f64,
}

impl ValuationConfig {
    pub fn policy(&self) -> ReconciliationPolicy {
        ReconciliationPolicy {
            fair_band: self.fair_band,
            tax_rate_per_thousand: self.tax_rate_per_thousand,
        }
    }

    pub fn bounds(&self) -> [(&'static str, ConfidenceBounds); 3] {
        [
            ("income_confidence", self.settings.income_confidence),
            ("sales_confidence", self.settings.sales_confidence),
            ("cost_confidence", self.settings.cost_confidence),
        ]
    }
}
