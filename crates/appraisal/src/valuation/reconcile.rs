//! Combines approach results into one indicated value and an assessment label.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{
    format_currency, round_currency, round_ratio, ApproachResult, ValuationSettings,
};

/// Caller-chosen policy for labelling and savings. There is deliberately no
/// `Default`: the FAIR band must be an explicit operator decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    /// Fractional band around the reconciled value inside which an
    /// assessment is considered FAIR (0.05 = ±5%).
    pub fair_band: f64,
    /// Tax rate in dollars per $1,000 of assessed value; 0 disables the
    /// dollar savings estimate.
    #[serde(default)]
    pub tax_rate_per_thousand: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssessmentLabel {
    Over,
    Fair,
    Under,
}

impl AssessmentLabel {
    pub fn classify(assessed_value: f64, indicated_value: f64, fair_band: f64) -> Self {
        if assessed_value > indicated_value * (1.0 + fair_band) {
            Self::Over
        } else if assessed_value < indicated_value * (1.0 - fair_band) {
            Self::Under
        } else {
            Self::Fair
        }
    }
}

impl fmt::Display for AssessmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Over => "OVER",
            Self::Fair => "FAIR",
            Self::Under => "UNDER",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedApproach {
    pub result: ApproachResult,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRequest {
    pub request_id: String,
    pub property_id: String,
    pub assessed_value: f64,
    pub approaches: Vec<WeightedApproach>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledValuation {
    pub request_id: String,
    pub property_id: String,
    pub label: Option<AssessmentLabel>,
    pub indicated_value: f64,
    pub confidence: f64,
    pub assessed_value: f64,
    /// Assessed value above the reconciled value, when labelled OVER.
    pub assessment_reduction: f64,
    /// Annual tax saving implied by `assessment_reduction`.
    pub savings_estimate: f64,
    /// 1.0 when approaches agree, down to 0.3 when they diverge widely.
    pub agreement: f64,
    /// Coefficient of variation of contributing values.
    pub dispersion: f64,
    pub contributing: Vec<WeightedApproach>,
    pub excluded: Vec<WeightedApproach>,
    pub rationale: Vec<String>,
    pub errors: Vec<String>,
}

impl ReconciledValuation {
    fn rejected(request: &ReconciliationRequest, errors: Vec<String>) -> Self {
        Self {
            request_id: request.request_id.clone(),
            property_id: request.property_id.clone(),
            label: None,
            indicated_value: 0.0,
            confidence: 0.0,
            assessed_value: request.assessed_value,
            assessment_reduction: 0.0,
            savings_estimate: 0.0,
            agreement: 0.0,
            dispersion: 0.0,
            contributing: Vec::new(),
            excluded: request.approaches.clone(),
            rationale: Vec::new(),
            errors,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Maps the spread of approach values onto a confidence multiplier.
pub fn agreement_factor(coefficient_of_variation: f64) -> f64 {
    if coefficient_of_variation > 0.3 {
        0.3
    } else if coefficient_of_variation > 0.2 {
        0.6
    } else if coefficient_of_variation > 0.1 {
        0.8
    } else {
        1.0
    }
}

/// Population coefficient of variation; 0 for fewer than two values.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

fn validate(request: &ReconciliationRequest, settings: &ValuationSettings) -> Vec<String> {
    let mut errors = Vec::new();

    if !(request.assessed_value.is_finite() && request.assessed_value > 0.0) {
        errors.push("assessed_value must be positive".to_string());
    }

    if request.approaches.is_empty() {
        errors.push("at least one approach result is required".to_string());
        return errors;
    }

    for approach in &request.approaches {
        if !approach.weight.is_finite() || approach.weight < 0.0 {
            errors.push(format!(
                "{} approach weight must be a non-negative number",
                approach.result.approach
            ));
        }
    }

    let sum: f64 = request.approaches.iter().map(|a| a.weight).sum();
    if sum.is_finite() && !settings.weights_balanced(sum) {
        errors.push(format!(
            "approach weights sum to {:.4}; expected 1.0 ± {}",
            sum, settings.weight_tolerance
        ));
    }

    errors
}

pub fn reconcile(
    request: &ReconciliationRequest,
    settings: &ValuationSettings,
    policy: &ReconciliationPolicy,
) -> ReconciledValuation {
    let errors = validate(request, settings);
    if !errors.is_empty() {
        return ReconciledValuation::rejected(request, errors);
    }

    let mut rationale = Vec::new();
    let (contributing, excluded): (Vec<WeightedApproach>, Vec<WeightedApproach>) = request
        .approaches
        .iter()
        .cloned()
        .partition(|a| a.result.is_valid() && a.weight > 0.0);

    for approach in &excluded {
        let reason = approach
            .result
            .errors
            .first()
            .cloned()
            .unwrap_or_else(|| "carries zero weight".to_string());
        rationale.push(format!(
            "{} approach excluded: {}",
            capitalize(&approach.result.approach.to_string()),
            reason
        ));
    }

    if contributing.is_empty() {
        let mut rejected = ReconciledValuation::rejected(
            request,
            vec!["no approach produced a usable value".to_string()],
        );
        rejected.rationale = rationale;
        return rejected;
    }

    let weight_total: f64 = contributing.iter().map(|a| a.weight).sum();
    let indicated_value = contributing
        .iter()
        .map(|a| a.result.indicated_value * a.weight)
        .sum::<f64>()
        / weight_total;
    let mean_confidence = contributing
        .iter()
        .map(|a| a.result.confidence * a.weight)
        .sum::<f64>()
        / weight_total;

    let values: Vec<f64> = contributing.iter().map(|a| a.result.indicated_value).collect();
    let dispersion = coefficient_of_variation(&values);
    let agreement = agreement_factor(dispersion);
    let confidence = round_ratio((mean_confidence * agreement).clamp(0.0, 1.0));
    let indicated_value = round_currency(indicated_value);

    for approach in &contributing {
        rationale.push(format!(
            "{} approach indicates {} at {:.0}% confidence (weight {:.2})",
            capitalize(&approach.result.approach.to_string()),
            format_currency(approach.result.indicated_value),
            approach.result.confidence * 100.0,
            approach.weight / weight_total
        ));
    }
    if contributing.len() > 1 {
        rationale.push(format!(
            "Approach values vary by {:.1}%; agreement factor {:.1}",
            dispersion * 100.0,
            agreement
        ));
    }

    let label = AssessmentLabel::classify(request.assessed_value, indicated_value, policy.fair_band);
    let assessment_reduction = if label == AssessmentLabel::Over {
        round_currency(request.assessed_value - indicated_value)
    } else {
        0.0
    };
    let savings_estimate =
        round_currency(assessment_reduction * policy.tax_rate_per_thousand / 1000.0);

    rationale.push(format!(
        "Reconciled value of {} against assessed value of {} is {} (±{:.1}% band)",
        format_currency(indicated_value),
        format_currency(request.assessed_value),
        label,
        policy.fair_band * 100.0
    ));

    tracing::info!(
        request_id = %request.request_id,
        indicated_value,
        confidence,
        label = %label,
        contributing = contributing.len(),
        excluded = excluded.len(),
        "Valuation reconciled"
    );

    ReconciledValuation {
        request_id: request.request_id.clone(),
        property_id: request.property_id.clone(),
        label: Some(label),
        indicated_value,
        confidence,
        assessed_value: request.assessed_value,
        assessment_reduction,
        savings_estimate,
        agreement,
        dispersion: round_ratio(dispersion),
        contributing,
        excluded,
        rationale,
        errors: Vec::new(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::types::ApproachKind;

    fn valid(approach: ApproachKind, value: f64, confidence: f64) -> ApproachResult {
        ApproachResult {
            approach,
            indicated_value: value,
            confidence,
            detail: None,
            rationale: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn request(assessed: f64, approaches: Vec<(ApproachResult, f64)>) -> ReconciliationRequest {
        ReconciliationRequest {
            request_id: "req-1".to_string(),
            property_id: "parcel-9".to_string(),
            assessed_value: assessed,
            approaches: approaches
                .into_iter()
                .map(|(result, weight)| WeightedApproach { result, weight })
                .collect(),
        }
    }

    fn policy() -> ReconciliationPolicy {
        ReconciliationPolicy {
            fair_band: 0.05,
            tax_rate_per_thousand: 20.0,
        }
    }

    #[test]
    fn test_label_thresholds() {
        assert_eq!(AssessmentLabel::classify(106.0, 100.0, 0.05), AssessmentLabel::Over);
        assert_eq!(AssessmentLabel::classify(105.0, 100.0, 0.05), AssessmentLabel::Fair);
        assert_eq!(AssessmentLabel::classify(95.0, 100.0, 0.05), AssessmentLabel::Fair);
        assert_eq!(AssessmentLabel::classify(94.0, 100.0, 0.05), AssessmentLabel::Under);
    }

    #[test]
    fn test_agreement_factor_tiers() {
        assert_eq!(agreement_factor(0.05), 1.0);
        assert_eq!(agreement_factor(0.15), 0.8);
        assert_eq!(agreement_factor(0.25), 0.6);
        assert_eq!(agreement_factor(0.35), 0.3);
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(&[100.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[100.0, 100.0]), 0.0);
        // mean 100, population std dev 10
        assert!((coefficient_of_variation(&[90.0, 110.0]) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_reconciliation_over_assessed() {
        let req = request(
            1_000_000.0,
            vec![
                (valid(ApproachKind::Income, 800_000.0, 0.7), 0.5),
                (valid(ApproachKind::SalesComparison, 820_000.0, 0.8), 0.5),
            ],
        );
        let valuation = reconcile(&req, &ValuationSettings::default(), &policy());
        assert!(valuation.is_valid());
        assert_eq!(valuation.indicated_value, 810_000.0);
        assert_eq!(valuation.label, Some(AssessmentLabel::Over));
        assert_eq!(valuation.agreement, 1.0);
        assert!((valuation.confidence - 0.75).abs() < 1e-9);
        assert_eq!(valuation.assessment_reduction, 190_000.0);
        assert_eq!(valuation.savings_estimate, 3_800.0);
        assert_eq!(valuation.contributing.len(), 2);
    }

    #[test]
    fn test_errored_approach_is_excluded_and_weights_renormalised() {
        let failed = ApproachResult::invalid(
            ApproachKind::Cost,
            vec!["land_value must be positive".to_string()],
        );
        let req = request(
            500_000.0,
            vec![
                (valid(ApproachKind::Income, 500_000.0, 0.6), 0.3),
                (failed, 0.7),
            ],
        );
        let valuation = reconcile(&req, &ValuationSettings::default(), &policy());
        assert!(valuation.is_valid());
        assert_eq!(valuation.indicated_value, 500_000.0);
        assert!((valuation.confidence - 0.6).abs() < 1e-9);
        assert_eq!(valuation.label, Some(AssessmentLabel::Fair));
        assert_eq!(valuation.savings_estimate, 0.0);
        assert_eq!(valuation.excluded.len(), 1);
        assert!(valuation.rationale[0].contains("Cost approach excluded"));
    }

    #[test]
    fn test_divergent_values_reduce_confidence() {
        let req = request(
            400_000.0,
            vec![
                (valid(ApproachKind::Income, 300_000.0, 0.9), 0.5),
                (valid(ApproachKind::Cost, 600_000.0, 0.9), 0.5),
            ],
        );
        let valuation = reconcile(&req, &ValuationSettings::default(), &policy());
        // cv = 150k / 450k = 0.333
        assert_eq!(valuation.agreement, 0.3);
        assert!((valuation.confidence - 0.27).abs() < 1e-9);
        assert_eq!(valuation.label, Some(AssessmentLabel::Under));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let req = request(
            400_000.0,
            vec![
                (valid(ApproachKind::Income, 300_000.0, 0.9), 0.5),
                (valid(ApproachKind::Cost, 600_000.0, 0.9), 0.2),
            ],
        );
        let valuation = reconcile(&req, &ValuationSettings::default(), &policy());
        assert_eq!(valuation.indicated_value, 0.0);
        assert_eq!(valuation.label, None);
        assert!(valuation.errors[0].contains("sum to 0.7000"));
    }

    #[test]
    fn test_all_approaches_failed() {
        let req = request(
            400_000.0,
            vec![(
                ApproachResult::invalid(ApproachKind::Income, vec!["bad".to_string()]),
                1.0,
            )],
        );
        let valuation = reconcile(&req, &ValuationSettings::default(), &policy());
        assert_eq!(valuation.errors, vec!["no approach produced a usable value"]);
        assert_eq!(valuation.confidence, 0.0);
    }

    #[test]
    fn test_non_positive_assessed_value() {
        let req = request(0.0, vec![(valid(ApproachKind::Income, 1.0, 0.5), 1.0)]);
        let valuation = reconcile(&req, &ValuationSettings::default(), &policy());
        assert_eq!(valuation.errors, vec!["assessed_value must be positive"]);
    }
}
