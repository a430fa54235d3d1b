//! Shared types for the risk assessment pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{AgentError, ScoringError, TraceError};
use crate::onboarding::model::Session;

// ── Agent results ───────────────────────────────────────────────────

/// One feature's share of an explainable score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub feature: String,
    /// Signed points added to the score.
    pub weight: Decimal,
    pub narrative: String,
}

impl Contribution {
    pub fn new(feature: impl Into<String>, weight: Decimal, narrative: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            weight,
            narrative: narrative.into(),
        }
    }
}

/// Output of one pipeline stage.
///
/// Only constructible through [`AgentResult::new`], which rejects scores
/// without a narrative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResult {
    agent_name: String,
    score: i32,
    narrative: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    contributions: Vec<Contribution>,
}

impl AgentResult {
    /// Base agents score 0..=100; adjustment agents report a signed delta.
    pub const SCORE_RANGE: std::ops::RangeInclusive<i32> = -100..=100;

    pub fn new(
        agent_name: impl Into<String>,
        score: i32,
        narrative: impl Into<String>,
    ) -> Result<Self, TraceError> {
        let agent_name = agent_name.into();
        let narrative = narrative.into();
        if agent_name.trim().is_empty() {
            return Err(TraceError::MissingAgentName);
        }
        if narrative.trim().is_empty() {
            return Err(TraceError::MissingNarrative { agent: agent_name });
        }
        if !Self::SCORE_RANGE.contains(&score) {
            return Err(TraceError::ScoreOutOfRange {
                agent: agent_name,
                score,
            });
        }
        Ok(Self {
            agent_name,
            score,
            narrative,
            contributions: Vec::new(),
        })
    }

    pub fn with_contributions(mut self, contributions: Vec<Contribution>) -> Self {
        self.contributions = contributions;
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn narrative(&self) -> &str {
        &self.narrative
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }
}

// ── Scoring collaborator output ─────────────────────────────────────

/// Explainable model output: a value and the ordered feature contributions
/// that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    value: Decimal,
    contributions: Vec<Contribution>,
}

impl ScoreReport {
    /// Rejects opaque scores: at least one contribution is required and every
    /// contribution must carry a narrative.
    pub fn new(value: Decimal, contributions: Vec<Contribution>) -> Result<Self, ScoringError> {
        if contributions.is_empty() || contributions.iter().any(|c| c.narrative.trim().is_empty()) {
            return Err(ScoringError::Unexplained);
        }
        Ok(Self {
            value,
            contributions,
        })
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    pub fn into_contributions(self) -> Vec<Contribution> {
        self.contributions
    }
}

// ── Verdict ─────────────────────────────────────────────────────────

/// Final decision shown at step 6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Rejected,
    Premium { amount: Decimal },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Premium { amount } => write!(f, "{}", format_inr(*amount)),
        }
    }
}

/// Aggregated, explainable result of one pipeline run. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    outcome: Outcome,
    outcome_label: String,
    score: u8,
    rule: String,
    traces: Vec<AgentResult>,
    advisor_insight: String,
    issued_at: DateTime<Utc>,
}

impl Verdict {
    pub(crate) fn new(
        outcome: Outcome,
        score: u8,
        rule: impl Into<String>,
        traces: Vec<AgentResult>,
        advisor_insight: impl Into<String>,
    ) -> Self {
        Self {
            outcome_label: outcome.to_string(),
            outcome,
            score,
            rule: rule.into(),
            traces,
            advisor_insight: advisor_insight.into(),
            issued_at: Utc::now(),
        }
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Aggregated score, 0..=100.
    pub fn score(&self) -> u8 {
        self.score
    }

    /// Name of the combination rule that produced `score`.
    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Every agent result, in evaluation order.
    pub fn traces(&self) -> &[AgentResult] {
        &self.traces
    }

    pub fn advisor_insight(&self) -> &str {
        &self.advisor_insight
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

// ── Agent trait ─────────────────────────────────────────────────────

/// A pipeline stage producing a score and its justification.
///
/// `prior` holds the results already committed by earlier stages, in order.
#[async_trait]
pub trait AssessmentAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        session: &Session,
        prior: &[AgentResult],
    ) -> Result<AgentResult, AgentError>;
}

// ── Formatting ──────────────────────────────────────────────────────

/// Whole-rupee amount with Indian digit grouping, e.g. `₹15,00,000`.
pub fn format_inr(amount: Decimal) -> String {
    let rounded = amount.round();
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let digits = rounded.abs().trunc().to_string();
    format!("₹{sign}{}", group_indian(&digits))
}

fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();
    format!("{},{}", groups.join(","), tail)
}
