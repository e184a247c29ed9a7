//! Tax savings projection for an appeal.

use serde::{Deserialize, Serialize};

use super::types::round_currency;

const MAX_TAX_RATE: f64 = 200.0;
const MAX_YEARS: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    /// Dollars per $1,000 of assessed value.
    #[default]
    PerThousand,
    /// Mills; one mill is $1 per $1,000.
    Mill,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxSavingsInput {
    pub current_assessed_value: f64,
    pub proposed_assessed_value: f64,
    pub tax_rate: f64,
    #[serde(default)]
    pub rate_basis: RateBasis,
    #[serde(default)]
    pub filing_fee: f64,
    #[serde(default)]
    pub attorney_fee: f64,
    #[serde(default)]
    pub other_costs: f64,
    #[serde(default = "default_years")]
    pub years_of_savings: u32,
}

fn default_years() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxSavingsResult {
    pub annual_tax_current: f64,
    pub annual_tax_proposed: f64,
    pub annual_savings: f64,
    pub total_appeal_costs: f64,
    pub net_first_year_savings: f64,
    pub cumulative_savings: f64,
    pub payback_period_years: Option<f64>,
    pub roi_percentage: Option<f64>,
    pub value_increase_warning: bool,
    pub negative_savings_warning: bool,
}

fn validate(input: &TaxSavingsInput) -> Vec<String> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("current_assessed_value", input.current_assessed_value),
        ("proposed_assessed_value", input.proposed_assessed_value),
        ("tax_rate", input.tax_rate),
    ] {
        if !(value.is_finite() && value > 0.0) {
            errors.push(format!("{} must be positive", field));
        }
    }

    if input.tax_rate.is_finite() && input.tax_rate > MAX_TAX_RATE {
        let basis = match input.rate_basis {
            RateBasis::PerThousand => "tax rate per $1000",
            RateBasis::Mill => "mill rate",
        };
        errors.push(format!("{} is too high (> {})", basis, MAX_TAX_RATE));
    }

    for (field, value) in [
        ("filing_fee", input.filing_fee),
        ("attorney_fee", input.attorney_fee),
        ("other_costs", input.other_costs),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            errors.push(format!("{} must not be negative", field));
        }
    }

    if !(1..=MAX_YEARS).contains(&input.years_of_savings) {
        errors.push(format!(
            "years_of_savings must be between 1 and {}",
            MAX_YEARS
        ));
    }

    errors
}

pub fn calculate_tax_savings(input: &TaxSavingsInput) -> Result<TaxSavingsResult, Vec<String>> {
    let errors = validate(input);
    if !errors.is_empty() {
        return Err(errors);
    }

    // Both bases express dollars per $1,000.
    let effective_rate = input.tax_rate / 1000.0;
    let years = f64::from(input.years_of_savings);

    let annual_tax_current = input.current_assessed_value * effective_rate;
    let annual_tax_proposed = input.proposed_assessed_value * effective_rate;
    let annual_savings = annual_tax_current - annual_tax_proposed;

    let total_appeal_costs = input.filing_fee + input.attorney_fee + input.other_costs;
    let net_first_year_savings = annual_savings - total_appeal_costs;
    let cumulative_savings = annual_savings * years - total_appeal_costs;

    let payback_period_years = (annual_savings > 0.0 && total_appeal_costs > 0.0)
        .then(|| round_currency(total_appeal_costs / annual_savings));
    let roi_percentage = (total_appeal_costs > 0.0).then(|| {
        let benefit = annual_savings * years;
        round_currency((benefit - total_appeal_costs) / total_appeal_costs * 100.0)
    });

    Ok(TaxSavingsResult {
        annual_tax_current: round_currency(annual_tax_current),
        annual_tax_proposed: round_currency(annual_tax_proposed),
        annual_savings: round_currency(annual_savings),
        total_appeal_costs: round_currency(total_appeal_costs),
        net_first_year_savings: round_currency(net_first_year_savings),
        cumulative_savings: round_currency(cumulative_savings),
        payback_period_years,
        roi_percentage,
        value_increase_warning: input.proposed_assessed_value > input.current_assessed_value,
        negative_savings_warning: annual_savings < 0.0,
    })
}
