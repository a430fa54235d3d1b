//! Advisor insight: one actionable suggestion derived from the traces.

use rust_decimal::Decimal;

use crate::onboarding::model::Product;

use super::types::{AgentResult, Contribution};

/// Build the insight from the most adverse feature contribution across all
/// traces. Falls back to a product-specific note when nothing counted
/// against the applicant.
pub fn insight(product: Product, traces: &[AgentResult]) -> String {
    let worst = traces
        .iter()
        .flat_map(|t| t.contributions())
        .filter(|c| c.weight < Decimal::ZERO)
        .fold(None::<&Contribution>, |worst, c| match worst {
            Some(w) if w.weight <= c.weight => Some(w),
            _ => Some(c),
        });

    match worst {
        Some(c) => advice_for(&c.feature, c.weight),
        None => match product {
            Product::Loan => "Your profile is strong. Keeping card utilisation low and repayments \
                              on time will preserve this standing for future credit."
                .to_string(),
            Product::Health => "To lower your premium further, maintaining this BMI for 6 months \
                                will unlock the 'Disciplined Lifestyle' discount."
                .to_string(),
        },
    }
}

fn advice_for(feature: &str, weight: Decimal) -> String {
    let points = weight.abs().round();
    match feature {
        "loan_to_income_ratio" => format!(
            "Requesting a smaller amount relative to your income would recover up to {points} points."
        ),
        "annual_income" => format!(
            "Adding a co-applicant's income would strengthen repayment capacity (up to {points} points)."
        ),
        "credit_score" => format!(
            "Raising your credit score above 750 through on-time repayments would recover up to {points} points."
        ),
        "bmi" => format!(
            "Bringing your BMI into the 18.5-24.9 range and holding it for 6 months would recover up to {points} points and lower your premium."
        ),
        "smoker" => format!(
            "Staying smoke-free for 12 months would remove a {points} point loading from your premium."
        ),
        "age" => "Annual health check-ups keep age-related loadings from rising further.".to_string(),
        other => format!(
            "Improving your {} would recover up to {points} points.",
            other.replace('_', " ")
        ),
    }
}
