//! Valuation engine: three independent approach calculators and the
//! reconciler that combines them.
//!
//! Everything here is pure and stateless; validation problems are returned as
//! error lists inside the results rather than through `Err`.

pub mod cost;
pub mod income;
pub mod reconcile;
pub mod request;
pub mod sales;
pub mod tax;
pub mod types;

pub use cost::{compute_cost_approach, CostDetail, CostInput, DepreciationBreakdown};
pub use income::{
    compute_income_approach, compute_noi, CapRateQuality, IncomeDetail, IncomeInput, NoiResult,
    PropertyFinancials,
};
pub use reconcile::{
    reconcile, AssessmentLabel, ReconciledValuation, ReconciliationPolicy, ReconciliationRequest,
    WeightedApproach,
};
pub use request::{value_property, ApproachWeights, ValuationRequest, ValuationResponse};
pub use sales::{
    compute_sales_comparison, AdjustedComparable, Adjustments, Comparable, SalesDetail, SalesInput,
};
pub use tax::{calculate_tax_savings, RateBasis, TaxSavingsInput, TaxSavingsResult};
pub use types::{
    ApproachDetail, ApproachKind, ApproachResult, ConfidenceBounds, ValuationSettings,
};
