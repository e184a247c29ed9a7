use std::fmt;

use serde::{Deserialize, Serialize};

use super::cost::CostDetail;
use super::income::IncomeDetail;
use super::sales::SalesDetail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproachKind {
    Income,
    SalesComparison,
    Cost,
}

impl fmt::Display for ApproachKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Income => "income",
            Self::SalesComparison => "sales comparison",
            Self::Cost => "cost",
        };
        f.write_str(name)
    }
}

/// Inclusive clamp range for an approach's confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBounds {
    pub min: f64,
    pub max: f64,
}

impl ConfidenceBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

/// Tunables shared by the approach calculators and the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuationSettings {
    #[serde(default = "default_weight_tolerance")]
    pub weight_tolerance: f64,
    #[serde(default = "default_income_confidence")]
    pub income_confidence: ConfidenceBounds,
    #[serde(default = "default_sales_confidence")]
    pub sales_confidence: ConfidenceBounds,
    #[serde(default = "default_cost_confidence")]
    pub cost_confidence: ConfidenceBounds,
}

fn default_weight_tolerance() -> f64 {
    0.01
}

fn default_income_confidence() -> ConfidenceBounds {
    ConfidenceBounds::new(0.3, 0.9)
}

fn default_sales_confidence() -> ConfidenceBounds {
    ConfidenceBounds::new(0.3, 0.95)
}

fn default_cost_confidence() -> ConfidenceBounds {
    ConfidenceBounds::new(0.3, 0.9)
}

impl Default for ValuationSettings {
    fn default() -> Self {
        Self {
            weight_tolerance: default_weight_tolerance(),
            income_confidence: default_income_confidence(),
            sales_confidence: default_sales_confidence(),
            cost_confidence: default_cost_confidence(),
        }
    }
}

impl ValuationSettings {
    /// True when `sum` is within tolerance of 1.0.
    pub fn weights_balanced(&self, sum: f64) -> bool {
        // Absorbs binary rounding of sums such as 0.3 + 0.7.
        (sum - 1.0).abs() <= self.weight_tolerance + 1e-9
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApproachDetail {
    Income(IncomeDetail),
    Sales(SalesDetail),
    Cost(CostDetail),
}

/// The output of one approach calculator. A result with errors always
/// carries a zero value and zero confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachResult {
    pub approach: ApproachKind,
    pub indicated_value: f64,
    pub confidence: f64,
    pub detail: Option<ApproachDetail>,
    pub rationale: Vec<String>,
    pub errors: Vec<String>,
}

impl ApproachResult {
    pub fn invalid(approach: ApproachKind, errors: Vec<String>) -> Self {
        Self {
            approach,
            indicated_value: 0.0,
            confidence: 0.0,
            detail: None,
            rationale: Vec::new(),
            errors,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Rounds to whole cents.
pub fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round_ratio(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Formats a dollar amount with thousands separators, dropping zero cents:
/// `410000.0` → `$410,000`, `1234.5` → `$1,234.50`.
pub fn format_currency(value: f64) -> String {
    let rounded = round_currency(value);
    let negative = rounded < 0.0;
    let cents_total = (rounded.abs() * 100.0).round() as u64;
    let dollars = cents_total / 100;
    let cents = cents_total % 100;

    let digits = dollars.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if negative { "-" } else { "" };
    if cents == 0 {
        format!("{}${}", sign, grouped)
    } else {
        format!("{}${}.{:02}", sign, grouped, cents)
    }
}

/// Collects a validation error when `value` is not a finite number.
pub(crate) fn require_finite(errors: &mut Vec<String>, field: &str, value: f64) -> bool {
    if value.is_finite() {
        true
    } else {
        errors.push(format!("{} must be a finite number", field));
        false
    }
}
