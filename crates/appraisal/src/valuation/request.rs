use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info_span, warn};

use crate::error::panic_message;

use super::cost::{compute_cost_approach, CostInput};
use super::income::{compute_income_approach, IncomeInput};
use super::reconcile::{
    reconcile, AssessmentLabel, ReconciliationPolicy, ReconciliationRequest, WeightedApproach,
};
use super::sales::{compute_sales_comparison, Comparable, SalesInput};
use super::types::{ApproachKind, ApproachResult, ValuationSettings};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproachWeights {
    pub income: f64,
    pub sales: f64,
    pub cost: f64,
}

impl ApproachWeights {
    fn get(&self, approach: ApproachKind) -> f64 {
        match approach {
            ApproachKind::Income => self.income,
            ApproachKind::SalesComparison => self.sales,
            ApproachKind::Cost => self.cost,
        }
    }
}

/// A request to value one property from whichever approach inputs are
/// available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRequest {
    pub request_id: String,
    pub property_id: String,
    pub assessed_value: f64,
    pub as_of: NaiveDate,
    #[serde(default)]
    pub income: Option<IncomeInput>,
    #[serde(default)]
    pub sales: Option<Vec<Comparable>>,
    #[serde(default)]
    pub cost: Option<CostInput>,
    pub weights: ApproachWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResponse {
    pub request_id: String,
    pub property_id: String,
    pub indicated_value: f64,
    pub confidence: f64,
    pub label: Option<AssessmentLabel>,
    pub savings_estimate: f64,
    pub assessment_reduction: f64,
    pub errors: Vec<String>,
    pub rationale: Vec<String>,
    pub approaches: Vec<ApproachResult>,
}

/// Runs a calculator behind a panic boundary so one malformed request
/// cannot take down its caller.
fn guarded<F>(approach: ApproachKind, compute: F) -> ApproachResult
where
    F: FnOnce() -> ApproachResult,
{
    match catch_unwind(AssertUnwindSafe(compute)) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(approach = %approach, error = %message, "Approach calculator panicked");
            ApproachResult::invalid(approach, vec![format!("internal fault: {}", message)])
        }
    }
}

pub fn value_property(
    request: &ValuationRequest,
    settings: &ValuationSettings,
    policy: &ReconciliationPolicy,
) -> ValuationResponse {
    let _span = info_span!(
        "valuation",
        request_id = %request.request_id,
        property_id = %request.property_id,
    )
    .entered();

    let mut results = Vec::new();
    if let Some(income) = &request.income {
        results.push(guarded(ApproachKind::Income, || {
            compute_income_approach(income, settings)
        }));
    }
    if let Some(comparables) = &request.sales {
        let input = SalesInput {
            comparables: comparables.clone(),
            as_of: request.as_of,
        };
        results.push(guarded(ApproachKind::SalesComparison, || {
            compute_sales_comparison(&input, settings)
        }));
    }
    if let Some(cost) = &request.cost {
        results.push(guarded(ApproachKind::Cost, || {
            compute_cost_approach(cost, settings)
        }));
    }

    let mut errors = Vec::new();
    for (approach, supplied) in [
        (ApproachKind::Income, request.income.is_some()),
        (ApproachKind::SalesComparison, request.sales.is_some()),
        (ApproachKind::Cost, request.cost.is_some()),
    ] {
        if !supplied && request.weights.get(approach) != 0.0 {
            errors.push(format!(
                "weight given for the {} approach but no input was supplied",
                approach
            ));
        }
    }

    if !errors.is_empty() {
        return ValuationResponse {
            request_id: request.request_id.clone(),
            property_id: request.property_id.clone(),
            indicated_value: 0.0,
            confidence: 0.0,
            label: None,
            savings_estimate: 0.0,
            assessment_reduction: 0.0,
            errors,
            rationale: Vec::new(),
            approaches: results,
        };
    }

    let reconciliation = ReconciliationRequest {
        request_id: request.request_id.clone(),
        property_id: request.property_id.clone(),
        assessed_value: request.assessed_value,
        approaches: results
            .iter()
            .cloned()
            .map(|result| WeightedApproach {
                weight: request.weights.get(result.approach),
                result,
            })
            .collect(),
    };

    let valuation = reconcile(&reconciliation, settings, policy);

    ValuationResponse {
        request_id: valuation.request_id,
        property_id: valuation.property_id,
        indicated_value: valuation.indicated_value,
        confidence: valuation.confidence,
        label: valuation.label,
        savings_estimate: valuation.savings_estimate,
        assessment_reduction: valuation.assessment_reduction,
        errors: valuation.errors,
        rationale: valuation.rationale,
        approaches: results,
    }
}
