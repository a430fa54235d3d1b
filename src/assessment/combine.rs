//! Combination rules and outcome policy.
//!
//! A rule folds the ordered agent scores into a single 0..=100 score; the
//! outcome policy turns that score into the product's decision. Both are
//! pure, so the same traces always yield the same verdict.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::onboarding::model::Product;

use super::types::{AgentResult, Outcome};

/// Deterministic fold of agent scores into a 0..=100 score.
pub trait CombinationRule: Send + Sync {
    fn name(&self) -> &str;

    fn combine(&self, traces: &[AgentResult]) -> u8;
}

fn clip(total: Decimal) -> u8 {
    total
        .round()
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
        .to_u8()
        .unwrap_or(0)
}

/// Plain sum of every score, clipped to 0..=100.
#[derive(Debug, Default, Clone)]
pub struct ClippedSum;

impl CombinationRule for ClippedSum {
    fn name(&self) -> &str {
        "clipped_sum"
    }

    fn combine(&self, traces: &[AgentResult]) -> u8 {
        let total: i64 = traces.iter().map(|t| i64::from(t.score())).sum();
        clip(Decimal::from(total))
    }
}

/// Positional weights applied to each score, then summed and clipped.
/// Stages past the end of `weights` count at weight 1.
#[derive(Debug, Clone)]
pub struct WeightedBlend {
    weights: Vec<Decimal>,
}

impl WeightedBlend {
    pub fn new(weights: Vec<Decimal>) -> Self {
        Self { weights }
    }
}

impl Default for WeightedBlend {
    /// Identity counts lightly, the model carries the decision and the
    /// context delta applies in full.
    fn default() -> Self {
        Self::new(vec![dec!(0.2), dec!(0.8), dec!(1)])
    }
}

impl CombinationRule for WeightedBlend {
    fn name(&self) -> &str {
        "weighted"
    }

    fn combine(&self, traces: &[AgentResult]) -> u8 {
        let total = traces.iter().enumerate().fold(Decimal::ZERO, |acc, (i, t)| {
            let w = self.weights.get(i).copied().unwrap_or(Decimal::ONE);
            acc + w * Decimal::from(t.score())
        });
        clip(total)
    }
}

/// Which combination rule to use, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationKind {
    ClippedSum,
    Weighted,
}

impl CombinationKind {
    pub fn build(&self) -> Box<dyn CombinationRule> {
        match self {
            Self::ClippedSum => Box::new(ClippedSum),
            Self::Weighted => Box::new(WeightedBlend::default()),
        }
    }
}

impl std::str::FromStr for CombinationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clipped_sum" | "sum" => Ok(Self::ClippedSum),
            "weighted" => Ok(Self::Weighted),
            other => Err(format!("unknown combination rule '{other}'")),
        }
    }
}

/// Maps an aggregated score to the product's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomePolicy {
    /// Loan approval cut-off on the 0..=100 score.
    pub approval_threshold: u8,
    /// Premium at a perfect score. A score of 0 doubles it.
    pub base_premium: Decimal,
    /// Premiums are rounded to the nearest multiple of this.
    pub premium_step: Decimal,
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        Self {
            approval_threshold: 60,
            base_premium: dec!(12000),
            premium_step: dec!(100),
        }
    }
}

impl OutcomePolicy {
    pub fn decide(&self, product: Product, score: u8) -> Outcome {
        match product {
            Product::Loan if score >= self.approval_threshold => Outcome::Approved,
            Product::Loan => Outcome::Rejected,
            Product::Health => Outcome::Premium {
                amount: self.premium(score),
            },
        }
    }

    fn premium(&self, score: u8) -> Decimal {
        let loading = dec!(2) - Decimal::from(score) / Decimal::ONE_HUNDRED;
        let raw = self.base_premium * loading;
        if self.premium_step.is_zero() {
            return raw.round();
        }
        (raw / self.premium_step).round() * self.premium_step
    }
}
