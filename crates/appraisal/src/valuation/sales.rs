//! Sales comparison approach.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::types::{
    format_currency, require_finite, round_currency, round_ratio, ApproachDetail, ApproachKind,
    ApproachResult, ValuationSettings,
};

const BASE_CONFIDENCE: f64 = 0.5;
const RECENT_SALE_DAYS: i64 = 365;

/// Signed dollar adjustments applied to a comparable's sale price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adjustments {
    pub condition: f64,
    pub location: f64,
    pub time: f64,
    pub other: f64,
}

impl Adjustments {
    fn values(&self) -> [f64; 4] {
        [self.condition, self.location, self.time, self.other]
    }

    pub fn net(&self) -> f64 {
        self.values().iter().sum()
    }

    pub fn gross(&self) -> f64 {
        self.values().iter().map(|v| v.abs()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparable {
    pub id: String,
    pub sale_price: f64,
    pub area_sqft: f64,
    #[serde(default)]
    pub sale_date: Option<NaiveDate>,
    #[serde(default)]
    pub adjustments: Adjustments,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesInput {
    pub comparables: Vec<Comparable>,
    /// Reference date for the recency check.
    pub as_of: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedComparable {
    pub id: String,
    pub adjusted_price: f64,
    pub adjusted_price_per_sf: f64,
    pub net_adjustment: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesDetail {
    pub weighted_avg_price_per_sf: f64,
    pub average_gross_adjustment: f64,
    pub recent_sales: usize,
    pub comparables: Vec<AdjustedComparable>,
}

fn validate(input: &SalesInput, settings: &ValuationSettings) -> Vec<String> {
    let mut errors = Vec::new();

    if input.comparables.is_empty() {
        errors.push("at least one comparable sale is required".to_string());
        return errors;
    }

    for comp in &input.comparables {
        let label = format!("comparable {}", comp.id);
        if require_finite(&mut errors, &format!("{} sale_price", label), comp.sale_price)
            && comp.sale_price <= 0.0
        {
            errors.push(format!("{}: sale price must be positive", label));
        }
        require_finite(&mut errors, &format!("{} area_sqft", label), comp.area_sqft);
        for (name, value) in [
            ("condition", comp.adjustments.condition),
            ("location", comp.adjustments.location),
            ("time", comp.adjustments.time),
            ("other", comp.adjustments.other),
        ] {
            require_finite(&mut errors, &format!("{} {} adjustment", label, name), value);
        }
        if require_finite(&mut errors, &format!("{} weight", label), comp.weight)
            && comp.weight < 0.0
        {
            errors.push(format!("{}: weight must not be negative", label));
        }
    }

    let weight_sum: f64 = input.comparables.iter().map(|c| c.weight).sum();
    if weight_sum.is_finite() && !settings.weights_balanced(weight_sum) {
        errors.push(format!(
            "comparable weights sum to {:.4}; expected 1.0 ± {}",
            weight_sum, settings.weight_tolerance
        ));
    }

    errors
}

fn is_recent(sale_date: Option<NaiveDate>, as_of: NaiveDate) -> bool {
    sale_date
        .map(|date| (0..=RECENT_SALE_DAYS).contains(&(as_of - date).num_days()))
        .unwrap_or(false)
}

fn adjustment_commentary(average_gross: f64) -> String {
    let percent = average_gross * 100.0;
    if average_gross > 0.20 {
        format!(
            "Average gross adjustment of {:.1}% indicates weak comparability",
            percent
        )
    } else if average_gross > 0.10 {
        format!(
            "Average gross adjustment of {:.1}% indicates moderate comparability",
            percent
        )
    } else {
        format!(
            "Average gross adjustment of {:.1}% indicates strong comparability",
            percent
        )
    }
}

pub fn compute_sales_comparison(
    input: &SalesInput,
    settings: &ValuationSettings,
) -> ApproachResult {
    let errors = validate(input, settings);
    if !errors.is_empty() {
        return ApproachResult::invalid(ApproachKind::SalesComparison, errors);
    }

    let comps = &input.comparables;
    let count = comps.len();

    let adjusted: Vec<AdjustedComparable> = comps
        .iter()
        .map(|comp| {
            let net_adjustment = comp.adjustments.net();
            let adjusted_price = comp.sale_price + net_adjustment;
            let adjusted_price_per_sf = if comp.area_sqft > 0.0 {
                adjusted_price / comp.area_sqft
            } else {
                0.0
            };
            AdjustedComparable {
                id: comp.id.clone(),
                adjusted_price,
                adjusted_price_per_sf,
                net_adjustment,
                weight: comp.weight,
            }
        })
        .collect();

    let indicated_value: f64 = adjusted.iter().map(|c| c.adjusted_price * c.weight).sum();
    let weighted_ppsf: f64 = adjusted
        .iter()
        .map(|c| c.adjusted_price_per_sf * c.weight)
        .sum();

    let recent_sales = comps
        .iter()
        .filter(|c| is_recent(c.sale_date, input.as_of))
        .count();
    let average_gross = comps
        .iter()
        .map(|c| c.adjustments.gross() / c.sale_price)
        .sum::<f64>()
        / count as f64;

    let mut confidence = BASE_CONFIDENCE;
    if count >= 3 {
        confidence += 0.1;
    }
    if count >= 5 {
        confidence += 0.1;
    }
    if recent_sales * 2 >= count {
        confidence += 0.1;
    }
    if average_gross > 0.20 {
        confidence -= 0.2;
    } else if average_gross > 0.10 {
        confidence -= 0.1;
    }
    let confidence = round_ratio(settings.sales_confidence.clamp(confidence));

    let (low, high) = adjusted.iter().fold((f64::MAX, f64::MIN), |(lo, hi), c| {
        (lo.min(c.adjusted_price), hi.max(c.adjusted_price))
    });

    let rationale = vec![
        format!("{} comparable sales analyzed", count),
        format!(
            "{} of {} comparables sold within the last 12 months",
            recent_sales, count
        ),
        format!(
            "Adjusted sale prices range from {} to {}",
            format_currency(low),
            format_currency(high)
        ),
        adjustment_commentary(average_gross),
    ];

    tracing::debug!(
        indicated_value,
        confidence,
        comparables = count,
        "Sales comparison computed"
    );

    ApproachResult {
        approach: ApproachKind::SalesComparison,
        indicated_value: round_currency(indicated_value),
        confidence,
        detail: Some(ApproachDetail::Sales(SalesDetail {
            weighted_avg_price_per_sf: round_currency(weighted_ppsf),
            average_gross_adjustment: round_ratio(average_gross),
            recent_sales,
            comparables: adjusted
                .into_iter()
                .map(|c| AdjustedComparable {
                    adjusted_price: round_currency(c.adjusted_price),
                    adjusted_price_per_sf: round_currency(c.adjusted_price_per_sf),
                    net_adjustment: round_currency(c.net_adjustment),
                    ..c
                })
                .collect(),
        })),
        rationale,
        errors: Vec::new(),
    }
}
