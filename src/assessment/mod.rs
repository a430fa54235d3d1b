//! Risk assessment — sequential agents folded into an explainable verdict.
//!
//! Stages run strictly in order (identity confirmation, explainable scoring,
//! market context). Each produces an [`AgentResult`] with a narrative; the
//! combination rule and outcome policy turn the ordered results into a
//! [`Verdict`] that keeps every trace.

pub mod advisor;
pub mod agents;
pub mod combine;
pub mod pipeline;
pub mod scoring;
pub mod types;

pub use agents::{
    ContextSource, ExplainableScoringAgent, IdentityConfirmationAgent, MarketContextAgent,
    MarketSignal, StaticMarketContext,
};
pub use combine::{ClippedSum, CombinationKind, CombinationRule, OutcomePolicy, WeightedBlend};
pub use pipeline::RiskPipeline;
pub use scoring::{GlassBoxModel, ScoringModel};
pub use types::{AgentResult, AssessmentAgent, Contribution, Outcome, ScoreReport, Verdict};
