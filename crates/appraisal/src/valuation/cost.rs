//! Cost approach: land value plus depreciated replacement cost.

use serde::{Deserialize, Serialize};

use super::types::{
    format_currency, require_finite, round_currency, round_ratio, ApproachDetail, ApproachKind,
    ApproachResult, ValuationSettings,
};

const BASE_CONFIDENCE: f64 = 0.6;
/// Ceiling on combined depreciation; improvements always retain some value.
pub const MAX_TOTAL_DEPRECIATION: f64 = 0.95;
const OLD_PROPERTY_YEARS: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostInput {
    pub land_value: f64,
    pub improvement_cost: f64,
    #[serde(default)]
    pub actual_age: f64,
    #[serde(default)]
    pub effective_age: f64,
    #[serde(default)]
    pub economic_life: f64,
    /// Fractions of replacement cost (0.1 = 10%).
    #[serde(default)]
    pub physical_depreciation: f64,
    #[serde(default)]
    pub functional_obsolescence: f64,
    #[serde(default)]
    pub external_obsolescence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepreciationBreakdown {
    pub physical: f64,
    pub functional: f64,
    pub external: f64,
    pub age: f64,
    pub total_uncapped: f64,
    pub total_applied: f64,
}

impl DepreciationBreakdown {
    pub fn compute(input: &CostInput) -> Self {
        let physical = input.physical_depreciation.min(1.0);
        let functional = input.functional_obsolescence.min(1.0);
        let external = input.external_obsolescence.min(1.0);
        let age = if input.economic_life > 0.0 {
            (input.effective_age / input.economic_life).min(1.0)
        } else {
            0.0
        };
        let total_uncapped = physical + functional + external + age;

        Self {
            physical,
            functional,
            external,
            age,
            total_uncapped,
            total_applied: total_uncapped.min(MAX_TOTAL_DEPRECIATION),
        }
    }

    pub fn is_capped(&self) -> bool {
        self.total_uncapped > self.total_applied
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostDetail {
    pub land_value: f64,
    pub improvement_cost: f64,
    pub depreciation: DepreciationBreakdown,
    pub depreciation_amount: f64,
    pub depreciated_improvement_value: f64,
}

fn validate(input: &CostInput) -> Vec<String> {
    let mut errors = Vec::new();

    if require_finite(&mut errors, "land_value", input.land_value) && input.land_value <= 0.0 {
        errors.push("land_value must be positive".to_string());
    }
    if require_finite(&mut errors, "improvement_cost", input.improvement_cost)
        && input.improvement_cost <= 0.0
    {
        errors.push("improvement_cost must be positive".to_string());
    }
    for (field, value) in [
        ("actual_age", input.actual_age),
        ("effective_age", input.effective_age),
        ("economic_life", input.economic_life),
        ("physical_depreciation", input.physical_depreciation),
        ("functional_obsolescence", input.functional_obsolescence),
        ("external_obsolescence", input.external_obsolescence),
    ] {
        if require_finite(&mut errors, field, value) && value < 0.0 {
            errors.push(format!("{} must not be negative", field));
        }
    }

    errors
}

fn confidence(input: &CostInput, depreciation: &DepreciationBreakdown) -> f64 {
    let mut confidence = BASE_CONFIDENCE;

    if input.effective_age < 5.0 {
        confidence += 0.15;
    } else if input.effective_age < 10.0 {
        confidence += 0.1;
    } else if input.effective_age < 20.0 {
        confidence += 0.05;
    }

    if input.actual_age > OLD_PROPERTY_YEARS || input.effective_age > OLD_PROPERTY_YEARS {
        confidence -= 0.1;
    }

    if depreciation.total_applied > 0.7 {
        confidence -= 0.15;
    } else if depreciation.total_applied > 0.5 {
        confidence -= 0.1;
    }

    if input.land_value > 0.0 && input.improvement_cost > 0.0 {
        confidence += 0.05;
    }

    confidence
}

pub fn compute_cost_approach(input: &CostInput, settings: &ValuationSettings) -> ApproachResult {
    let errors = validate(input);
    if !errors.is_empty() {
        return ApproachResult::invalid(ApproachKind::Cost, errors);
    }

    let depreciation = DepreciationBreakdown::compute(input);
    let depreciation_amount = input.improvement_cost * depreciation.total_applied;
    let depreciated_improvement_value = input.improvement_cost - depreciation_amount;
    let indicated_value = round_currency(input.land_value + depreciated_improvement_value);
    let confidence = round_ratio(settings.cost_confidence.clamp(confidence(input, &depreciation)));

    let mut rationale = vec![
        format!("Land value of {}", format_currency(input.land_value)),
        format!(
            "Replacement cost new of {} less {:.1}% total depreciation",
            format_currency(input.improvement_cost),
            depreciation.total_applied * 100.0
        ),
    ];
    if input.economic_life > 0.0 {
        rationale.push(format!(
            "Age-life depreciation of {:.1}% (effective age {} of {}-year economic life)",
            depreciation.age * 100.0,
            input.effective_age,
            input.economic_life
        ));
    } else {
        rationale.push(
            "No economic life supplied; age-life depreciation omitted".to_string(),
        );
    }
    if depreciation.is_capped() {
        rationale.push(format!(
            "Total depreciation capped at {:.0}% (uncapped {:.1}%)",
            MAX_TOTAL_DEPRECIATION * 100.0,
            depreciation.total_uncapped * 100.0
        ));
    }

    tracing::debug!(
        indicated_value,
        confidence,
        total_depreciation = depreciation.total_applied,
        "Cost approach computed"
    );

    ApproachResult {
        approach: ApproachKind::Cost,
        indicated_value,
        confidence,
        detail: Some(ApproachDetail::Cost(CostDetail {
            land_value: round_currency(input.land_value),
            improvement_cost: round_currency(input.improvement_cost),
            depreciation: DepreciationBreakdown {
                physical: round_ratio(depreciation.physical),
                functional: round_ratio(depreciation.functional),
                external: round_ratio(depreciation.external),
                age: round_ratio(depreciation.age),
                total_uncapped: round_ratio(depreciation.total_uncapped),
                total_applied: round_ratio(depreciation.total_applied),
            },
            depreciation_amount: round_currency(depreciation_amount),
            depreciated_improvement_value: round_currency(depreciated_improvement_value),
        })),
        rationale,
        errors: Vec::new(),
    }
}
