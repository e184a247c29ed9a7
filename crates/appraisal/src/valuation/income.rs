//! Income capitalization approach.

use serde::{Deserialize, Serialize};

use super::types::{
    format_currency, require_finite, round_currency, round_ratio, ApproachDetail, ApproachKind,
    ApproachResult, ValuationSettings,
};

const BASE_CONFIDENCE: f64 = 0.6;
const MAX_CAP_RATE: f64 = 0.5;
const HIGH_VACANCY: f64 = 0.25;
const HIGH_EXPENSE_RATIO: f64 = 0.6;

/// Validated income figures produced by the upstream field-mapping step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropertyFinancials {
    pub gross_rental_income: f64,
    pub operating_expenses: f64,
    pub vacancy_rate: f64,
    #[serde(default)]
    pub other_income: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiResult {
    pub effective_gross_income: f64,
    pub vacancy_amount: f64,
    pub net_operating_income: f64,
}

pub fn compute_noi(financials: &PropertyFinancials) -> Result<NoiResult, Vec<String>> {
    let mut errors = Vec::new();

    if require_finite(&mut errors, "gross_rental_income", financials.gross_rental_income)
        && financials.gross_rental_income < 0.0
    {
        errors.push("gross_rental_income must not be negative".to_string());
    }
    if require_finite(&mut errors, "operating_expenses", financials.operating_expenses)
        && financials.operating_expenses < 0.0
    {
        errors.push("operating_expenses must not be negative".to_string());
    }
    if require_finite(&mut errors, "vacancy_rate", financials.vacancy_rate)
        && !(0.0..=1.0).contains(&financials.vacancy_rate)
    {
        errors.push("vacancy_rate must be between 0 and 1".to_string());
    }
    if require_finite(&mut errors, "other_income", financials.other_income)
        && financials.other_income < 0.0
    {
        errors.push("other_income must not be negative".to_string());
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let vacancy_amount = financials.gross_rental_income * financials.vacancy_rate;
    let effective_gross_income =
        financials.gross_rental_income - vacancy_amount + financials.other_income;
    let net_operating_income = effective_gross_income - financials.operating_expenses;

    Ok(NoiResult {
        effective_gross_income: round_currency(effective_gross_income),
        vacancy_amount: round_currency(vacancy_amount),
        net_operating_income: round_currency(net_operating_income),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapRateQuality {
    VeryLow,
    Low,
    Reasonable,
    High,
    VeryHigh,
}

impl CapRateQuality {
    pub fn classify(cap_rate: f64) -> Self {
        if cap_rate < 0.02 {
            Self::VeryLow
        } else if cap_rate < 0.04 {
            Self::Low
        } else if cap_rate <= 0.12 {
            Self::Reasonable
        } else if cap_rate <= 0.20 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::VeryLow => "very low",
            Self::Low => "low",
            Self::Reasonable => "within the typical market range",
            Self::High => "high",
            Self::VeryHigh => "very high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IncomeInput {
    pub financials: PropertyFinancials,
    pub cap_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeDetail {
    pub effective_gross_income: f64,
    pub vacancy_amount: f64,
    pub operating_expenses: f64,
    pub net_operating_income: f64,
    pub cap_rate: f64,
    pub cap_rate_quality: CapRateQuality,
    pub expense_ratio: f64,
}

pub fn compute_income_approach(
    input: &IncomeInput,
    settings: &ValuationSettings,
) -> ApproachResult {
    let mut errors = Vec::new();

    let noi = match compute_noi(&input.financials) {
        Ok(noi) => Some(noi),
        Err(noi_errors) => {
            errors.extend(noi_errors);
            None
        }
    };

    if require_finite(&mut errors, "cap_rate", input.cap_rate)
        && !(input.cap_rate > 0.0 && input.cap_rate <= MAX_CAP_RATE)
    {
        errors.push(format!(
            "cap_rate must be greater than 0 and at most {}",
            MAX_CAP_RATE
        ));
    }

    let noi = match noi {
        Some(noi) if errors.is_empty() => noi,
        _ => return ApproachResult::invalid(ApproachKind::Income, errors),
    };

    if noi.net_operating_income <= 0.0 {
        return ApproachResult::invalid(
            ApproachKind::Income,
            vec![format!(
                "net operating income of {} cannot be capitalized",
                format_currency(noi.net_operating_income)
            )],
        );
    }

    let financials = &input.financials;
    let cap_rate = input.cap_rate;
    let quality = CapRateQuality::classify(cap_rate);
    let indicated_value = round_currency(noi.net_operating_income / cap_rate);
    let expense_ratio = if noi.effective_gross_income > 0.0 {
        financials.operating_expenses / noi.effective_gross_income
    } else {
        0.0
    };

    let mut confidence = BASE_CONFIDENCE;
    match quality {
        CapRateQuality::Reasonable => confidence += 0.1,
        CapRateQuality::VeryLow | CapRateQuality::VeryHigh => confidence -= 0.1,
        CapRateQuality::Low | CapRateQuality::High => {}
    }
    if financials.vacancy_rate > HIGH_VACANCY {
        confidence -= 0.1;
    }
    if expense_ratio > HIGH_EXPENSE_RATIO {
        confidence -= 0.05;
    }
    let confidence = round_ratio(settings.income_confidence.clamp(confidence));

    let rationale = vec![
        format!(
            "Effective gross income of {} after {:.1}% vacancy",
            format_currency(noi.effective_gross_income),
            financials.vacancy_rate * 100.0
        ),
        format!(
            "Net operating income of {} after {} in operating expenses ({:.1}% expense ratio)",
            format_currency(noi.net_operating_income),
            format_currency(financials.operating_expenses),
            expense_ratio * 100.0
        ),
        format!(
            "Capitalized at {:.2}%, a cap rate that is {}",
            cap_rate * 100.0,
            quality.describe()
        ),
    ];

    tracing::debug!(
        indicated_value,
        confidence,
        cap_rate,
        "Income approach computed"
    );

    ApproachResult {
        approach: ApproachKind::Income,
        indicated_value,
        confidence,
        detail: Some(ApproachDetail::Income(IncomeDetail {
            effective_gross_income: noi.effective_gross_income,
            vacancy_amount: noi.vacancy_amount,
            operating_expenses: round_currency(financials.operating_expenses),
            net_operating_income: noi.net_operating_income,
            cap_rate,
            cap_rate_quality: quality,
            expense_ratio: round_ratio(expense_ratio),
        })),
        rationale,
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn financials(gross: f64, expenses: f64, vacancy: f64) -> PropertyFinancials {
        PropertyFinancials {
            gross_rental_income: gross,
            operating_expenses: expenses,
            vacancy_rate: vacancy,
            other_income: 0.0,
        }
    }

    #[test]
    fn test_compute_noi_example() {
        let noi = compute_noi(&financials(100_000.0, 30_000.0, 0.1)).unwrap();
        assert_eq!(noi.effective_gross_income, 90_000.0);
        assert_eq!(noi.vacancy_amount, 10_000.0);
        assert_eq!(noi.net_operating_income, 60_000.0);
    }

    #[test]
    fn test_compute_noi_with_other_income() {
        let mut input = financials(100_000.0, 30_000.0, 0.05);
        input.other_income = 2_500.0;
        let noi = compute_noi(&input).unwrap();
        assert_eq!(noi.effective_gross_income, 97_500.0);
        assert_eq!(noi.net_operating_income, 67_500.0);
    }

    #[test]
    fn test_compute_noi_validation_collects_all_errors() {
        let errors = compute_noi(&financials(-1.0, -1.0, 1.5)).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("gross_rental_income")));
        assert!(errors.iter().any(|e| e.contains("operating_expenses")));
        assert!(errors.iter().any(|e| e.contains("vacancy_rate")));
    }

    #[test]
    fn test_compute_noi_rejects_nan() {
        let errors = compute_noi(&financials(f64::NAN, 0.0, 0.0)).unwrap_err();
        assert_eq!(errors, vec!["gross_rental_income must be a finite number"]);
    }

    #[test]
    fn test_vacancy_bounds_are_inclusive() {
        assert!(compute_noi(&financials(100.0, 0.0, 0.0)).is_ok());
        assert!(compute_noi(&financials(100.0, 0.0, 1.0)).is_ok());
    }

    #[test]
    fn test_cap_rate_quality() {
        assert_eq!(CapRateQuality::classify(0.015), CapRateQuality::VeryLow);
        assert_eq!(CapRateQuality::classify(0.03), CapRateQuality::Low);
        assert_eq!(CapRateQuality::classify(0.04), CapRateQuality::Reasonable);
        assert_eq!(CapRateQuality::classify(0.12), CapRateQuality::Reasonable);
        assert_eq!(CapRateQuality::classify(0.15), CapRateQuality::High);
        assert_eq!(CapRateQuality::classify(0.25), CapRateQuality::VeryHigh);
    }

    #[test]
    fn test_income_approach_value_and_confidence() {
        let input = IncomeInput {
            financials: financials(100_000.0, 30_000.0, 0.1),
            cap_rate: 0.08,
        };
        let result = compute_income_approach(&input, &ValuationSettings::default());
        assert!(result.is_valid());
        assert_eq!(result.indicated_value, 750_000.0);
        assert!((result.confidence - 0.7).abs() < 1e-9);
        assert_eq!(result.rationale.len(), 3);
        match result.detail {
            Some(ApproachDetail::Income(detail)) => {
                assert_eq!(detail.net_operating_income, 60_000.0);
                assert_eq!(detail.cap_rate_quality, CapRateQuality::Reasonable);
            }
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    #[test]
    fn test_income_approach_penalises_high_vacancy_and_expenses() {
        let input = IncomeInput {
            financials: financials(100_000.0, 50_000.0, 0.3),
            cap_rate: 0.25,
        };
        let result = compute_income_approach(&input, &ValuationSettings::default());
        // 0.6 - 0.1 (very high cap) - 0.1 (vacancy) - 0.05 (expense ratio 71%)
        assert!((result.confidence - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_income_approach_rejects_bad_cap_rate() {
        for cap_rate in [0.0, -0.05, 0.51] {
            let input = IncomeInput {
                financials: financials(100_000.0, 30_000.0, 0.1),
                cap_rate,
            };
            let result = compute_income_approach(&input, &ValuationSettings::default());
            assert!(!result.is_valid());
            assert_eq!(result.indicated_value, 0.0);
            assert_eq!(result.confidence, 0.0);
        }
    }

    #[test]
    fn test_income_approach_rejects_non_positive_noi() {
        let input = IncomeInput {
            financials: financials(50_000.0, 60_000.0, 0.0),
            cap_rate: 0.08,
        };
        let result = compute_income_approach(&input, &ValuationSettings::default());
        assert_eq!(result.indicated_value, 0.0);
        assert!(result.errors[0].contains("cannot be capitalized"));
    }
}
