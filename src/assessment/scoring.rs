//! Explainable scoring collaborator.
//!
//! `ScoringModel` is the contract for any glass-box model. `GlassBoxModel`
//! is the built-in implementation: an additive model where each feature
//! passes through a binned shape function and contributes signed points on
//! top of an intercept. Every contribution carries a plain-language
//! narrative, so the score can always be explained term by term.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::ScoringError;
use crate::onboarding::model::{HealthIntake, IntakeForm, LoanIntake};

use super::types::{Contribution, ScoreReport, format_inr};

/// Contributions smaller than this (in points) are treated as noise when
/// summarising.
pub const WEAK_SIGNAL: Decimal = dec!(1);

const LOAN_INTERCEPT: Decimal = dec!(55);
const HEALTH_INTERCEPT: Decimal = dec!(70);

/// (exclusive upper bound, points). Values past the last bound get `tail`.
struct Shape {
    bins: &'static [(Decimal, Decimal)],
    tail: Decimal,
}

impl Shape {
    fn eval(&self, value: Decimal) -> Decimal {
        self.bins
            .iter()
            .find(|(upper, _)| value < *upper)
            .map(|(_, points)| *points)
            .unwrap_or(self.tail)
    }
}

const LOAN_TO_INCOME: Shape = Shape {
    bins: &[(dec!(1), dec!(25)), (dec!(3), dec!(15)), (dec!(5), dec!(0)), (dec!(8), dec!(-15))],
    tail: dec!(-30),
};

const ANNUAL_INCOME: Shape = Shape {
    bins: &[
        (dec!(300000), dec!(-10)),
        (dec!(500000), dec!(-5)),
        (dec!(1000000), dec!(5)),
        (dec!(2000000), dec!(10)),
    ],
    tail: dec!(15),
};

const CREDIT_SCORE: Shape = Shape {
    bins: &[(dec!(550), dec!(-25)), (dec!(650), dec!(-10)), (dec!(750), dec!(5))],
    tail: dec!(15),
};

const BMI: Shape = Shape {
    bins: &[(dec!(18.5), dec!(-10)), (dec!(25), dec!(15)), (dec!(30), dec!(0)), (dec!(35), dec!(-15))],
    tail: dec!(-25),
};

const AGE: Shape = Shape {
    bins: &[(dec!(30), dec!(5)), (dec!(45), dec!(0)), (dec!(60), dec!(-10))],
    tail: dec!(-20),
};

/// Explainable model contract.
#[async_trait]
pub trait ScoringModel: Send + Sync {
    fn name(&self) -> &str;

    /// Score an intake form. Higher is better for the applicant.
    async fn score(&self, intake: &IntakeForm) -> Result<ScoreReport, ScoringError>;
}

/// Built-in additive glass-box model.
#[derive(Debug, Default, Clone)]
pub struct GlassBoxModel;

impl GlassBoxModel {
    pub fn new() -> Self {
        Self
    }

    fn score_loan(&self, loan: &LoanIntake) -> Result<ScoreReport, ScoringError> {
        let income = loan
            .annual_income
            .ok_or_else(|| ScoringError::MissingFeature("annual_income".into()))?;
        let requested = loan
            .requested_amount
            .ok_or_else(|| ScoringError::MissingFeature("requested_amount".into()))?;

        let ratio = income
            .checked_add(Decimal::ONE)
            .and_then(|divisor| requested.checked_div(divisor))
            .ok_or_else(|| ScoringError::InvalidInput("loan-to-income ratio overflow".into()))?;

        let mut contributions = Vec::with_capacity(3);

        let points = LOAN_TO_INCOME.eval(ratio);
        contributions.push(Contribution::new(
            "loan_to_income_ratio",
            points,
            finance_narrative(
                &format!("Your loan is {}× your income", ratio.round_dp(2)),
                points,
            ),
        ));

        let points = ANNUAL_INCOME.eval(income);
        contributions.push(Contribution::new(
            "annual_income",
            points,
            finance_narrative(
                &format!(
                    "Your yearly income ({}) affects your repayment capacity",
                    format_inr(income)
                ),
                points,
            ),
        ));

        if let Some(credit) = loan.credit_score {
            let points = CREDIT_SCORE.eval(Decimal::from(credit));
            contributions.push(Contribution::new(
                "credit_score",
                points,
                finance_narrative(
                    &format!("Your credit score ({credit}) shows your repayment reliability"),
                    points,
                ),
            ));
        }

        report(LOAN_INTERCEPT, contributions)
    }

    fn score_health(&self, health: &HealthIntake) -> Result<ScoreReport, ScoringError> {
        let height = health
            .height_cm
            .ok_or_else(|| ScoringError::MissingFeature("height_cm".into()))?;
        let weight = health
            .weight_kg
            .ok_or_else(|| ScoringError::MissingFeature("weight_kg".into()))?;
        if height <= Decimal::ZERO {
            return Err(ScoringError::InvalidInput(
                "height must be positive to compute BMI".into(),
            ));
        }

        // A tiny height squares to zero, a huge weight overflows the quotient
        let bmi = height
            .checked_div(dec!(100))
            .and_then(|metres| metres.checked_mul(metres))
            .and_then(|area| weight.checked_div(area))
            .ok_or_else(|| ScoringError::InvalidInput("height and weight give no usable BMI".into()))?;

        let mut contributions = Vec::with_capacity(3);

        let points = BMI.eval(bmi);
        contributions.push(Contribution::new(
            "bmi",
            points,
            health_narrative(
                &format!("Your BMI ({}) reflects fitness level", bmi.round_dp(2)),
                points,
            ),
        ));

        let points = if health.smoker { dec!(-25) } else { dec!(5) };
        contributions.push(Contribution::new(
            "smoker",
            points,
            health_narrative("Smoking status influences medical costs", points),
        ));

        if let Some(age) = health.age_years {
            let points = AGE.eval(Decimal::from(age));
            contributions.push(Contribution::new(
                "age",
                points,
                health_narrative(&format!("Your age ({age} years) affects health risk"), points),
            ));
        }

        report(HEALTH_INTERCEPT, contributions)
    }
}

#[async_trait]
impl ScoringModel for GlassBoxModel {
    fn name(&self) -> &str {
        "glass-box-additive"
    }

    async fn score(&self, intake: &IntakeForm) -> Result<ScoreReport, ScoringError> {
        match intake {
            IntakeForm::Loan(loan) => self.score_loan(loan),
            IntakeForm::Health(health) => self.score_health(health),
        }
    }
}

fn report(intercept: Decimal, contributions: Vec<Contribution>) -> Result<ScoreReport, ScoringError> {
    let value = contributions.iter().fold(intercept, |acc, c| acc + c.weight);
    ScoreReport::new(value, contributions)
}

fn finance_narrative(base: &str, points: Decimal) -> String {
    let sentiment = if points > Decimal::ZERO {
        "helped your approval"
    } else if points < Decimal::ZERO {
        "reduced approval chances"
    } else {
        "had a neutral effect"
    };
    format!("{base}. This {sentiment}.")
}

fn health_narrative(base: &str, points: Decimal) -> String {
    let sentiment = if points > Decimal::ZERO {
        "reduced premium"
    } else if points < Decimal::ZERO {
        "increased premium"
    } else {
        "had a neutral effect"
    };
    format!("{base}. This {sentiment}.")
}
