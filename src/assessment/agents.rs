//! The canonical assessment agents, in evaluation order:
//! identity confirmation → explainable scoring → market context.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::onboarding::model::{Product, Session};

use super::scoring::{ScoringModel, WEAK_SIGNAL};
use super::types::{AgentResult, AssessmentAgent, Contribution};

pub const IDENTITY_AGENT: &str = "Identity Verification Agent";
pub const SCORING_AGENT: &str = "Explainable Risk Engine";
pub const MARKET_AGENT: &str = "Market Interaction Check";

/// Most narratives quoted in the scoring summary.
const SUMMARY_LIMIT: usize = 3;

// ── Identity confirmation ───────────────────────────────────────────

/// Asserts the applicant was verified and passes the collaborator's
/// confidence through as the score.
pub struct IdentityConfirmationAgent {
    provider: String,
}

impl IdentityConfirmationAgent {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

#[async_trait]
impl AssessmentAgent for IdentityConfirmationAgent {
    fn name(&self) -> &str {
        IDENTITY_AGENT
    }

    async fn evaluate(
        &self,
        session: &Session,
        _prior: &[AgentResult],
    ) -> Result<AgentResult, AgentError> {
        let identity = session.identity();
        if !identity.verified() {
            return Err(AgentError::MissingInput("identity has not been verified".into()));
        }
        let name = identity.display_name().unwrap_or("applicant");
        let narrative = format!(
            "Identity of {name} ({}) cross-referenced with {} at {}% confidence.",
            identity.masked_id(),
            self.provider,
            identity.confidence()
        );
        Ok(AgentResult::new(IDENTITY_AGENT, i32::from(identity.confidence()), narrative)?)
    }
}

// ── Explainable scoring ─────────────────────────────────────────────

/// Scores the intake form through an explainable model and summarises the
/// strongest feature contributions.
pub struct ExplainableScoringAgent {
    model: Arc<dyn ScoringModel>,
}

impl ExplainableScoringAgent {
    pub fn new(model: Arc<dyn ScoringModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl AssessmentAgent for ExplainableScoringAgent {
    fn name(&self) -> &str {
        SCORING_AGENT
    }

    async fn evaluate(
        &self,
        session: &Session,
        _prior: &[AgentResult],
    ) -> Result<AgentResult, AgentError> {
        let intake = session
            .intake()
            .ok_or_else(|| AgentError::MissingInput("intake form not submitted".into()))?;

        let report = self.model.score(intake).await?;
        let score = clamp_score(report.value());
        let narrative = summarize(self.model.name(), score, report.contributions());

        tracing::debug!(
            model = self.model.name(),
            raw = %report.value(),
            score,
            features = report.contributions().len(),
            "Explainable score computed"
        );

        Ok(AgentResult::new(SCORING_AGENT, score, narrative)?
            .with_contributions(report.into_contributions()))
    }
}

fn clamp_score(value: Decimal) -> i32 {
    value
        .round()
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
        .to_i32()
        .unwrap_or(0)
}

/// Strongest contributions first; ties keep model order.
fn summarize(model: &str, score: i32, contributions: &[Contribution]) -> String {
    let mut significant: Vec<&Contribution> = contributions
        .iter()
        .filter(|c| c.weight.abs() >= WEAK_SIGNAL)
        .collect();
    significant.sort_by(|a, b| b.weight.abs().cmp(&a.weight.abs()));

    if significant.is_empty() {
        return format!(
            "{model} scored {score}/100; no single factor moved the score significantly."
        );
    }

    let reasons: Vec<&str> = significant
        .iter()
        .take(SUMMARY_LIMIT)
        .map(|c| c.narrative.as_str())
        .collect();
    format!("{model} scored {score}/100. {}", reasons.join(" "))
}

// ── Market context ──────────────────────────────────────────────────

/// Secondary adjustment signal for a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSignal {
    /// Signed adjustment in points.
    pub delta: i32,
    pub reason: String,
}

/// Source of market/context conditions.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn signal(&self, product: Product) -> Result<MarketSignal, String>;
}

/// Fixed per-product signals, configured at startup.
pub struct StaticMarketContext {
    loan: MarketSignal,
    health: MarketSignal,
}

impl StaticMarketContext {
    pub fn new(loan_delta: i32, health_delta: i32) -> Self {
        Self {
            loan: MarketSignal {
                delta: loan_delta,
                reason: "current market inflation on lending rates".into(),
            },
            health: MarketSignal {
                delta: health_delta,
                reason: "medical cost inflation".into(),
            },
        }
    }
}

#[async_trait]
impl ContextSource for StaticMarketContext {
    async fn signal(&self, product: Product) -> Result<MarketSignal, String> {
        Ok(match product {
            Product::Loan => self.loan.clone(),
            Product::Health => self.health.clone(),
        })
    }
}

/// Applies the market signal as a signed delta, narrated against the score
/// the scoring agent committed before it.
pub struct MarketContextAgent {
    source: Arc<dyn ContextSource>,
}

impl MarketContextAgent {
    pub fn new(source: Arc<dyn ContextSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl AssessmentAgent for MarketContextAgent {
    fn name(&self) -> &str {
        MARKET_AGENT
    }

    async fn evaluate(
        &self,
        session: &Session,
        prior: &[AgentResult],
    ) -> Result<AgentResult, AgentError> {
        let product = session
            .product()
            .ok_or_else(|| AgentError::MissingInput("no product selected".into()))?;
        let signal = self.source.signal(product).await.map_err(AgentError::Upstream)?;

        let basis = prior
            .iter()
            .rev()
            .find(|r| r.agent_name() == SCORING_AGENT)
            .or_else(|| prior.last());

        let effect = match signal.delta {
            d if d < 0 => "Minor interaction penalty",
            d if d > 0 => "Favourable interaction bonus",
            _ => "No interaction adjustment",
        };
        let narrative = match basis {
            Some(r) => format!(
                "{effect} of {:+} on the {} score of {} due to {}.",
                signal.delta,
                r.agent_name(),
                r.score(),
                signal.reason
            ),
            None => format!("{effect} of {:+} due to {}.", signal.delta, signal.reason),
        };
        Ok(AgentResult::new(MARKET_AGENT, signal.delta, narrative)?)
    }
}
