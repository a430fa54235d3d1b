//! Risk assessment pipeline. Runs the agents strictly in order and folds
//! their results into a verdict.
//!
//! **No partial verdicts.** If a stage fails or times out, or the run is
//! cancelled, the collected traces are dropped and only the error (naming the
//! agent) is returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AgentError, PipelineError};
use crate::onboarding::model::Session;

use super::advisor;
use super::agents::{
    ContextSource, ExplainableScoringAgent, IdentityConfirmationAgent, MarketContextAgent,
};
use super::combine::{CombinationRule, OutcomePolicy};
use super::scoring::ScoringModel;
use super::types::{AgentResult, AssessmentAgent, Verdict};

/// Ordered set of agents plus the rule and policy that aggregate them.
pub struct RiskPipeline {
    agents: Vec<Arc<dyn AssessmentAgent>>,
    rule: Box<dyn CombinationRule>,
    policy: OutcomePolicy,
    stage_timeout: Option<Duration>,
}

impl RiskPipeline {
    /// Empty pipeline. Add stages with [`RiskPipeline::with_agent`].
    pub fn new(rule: Box<dyn CombinationRule>, policy: OutcomePolicy) -> Self {
        Self {
            agents: Vec::new(),
            rule,
            policy,
            stage_timeout: None,
        }
    }

    /// The canonical three-stage pipeline.
    pub fn standard(
        identity_provider: impl Into<String>,
        model: Arc<dyn ScoringModel>,
        context: Arc<dyn ContextSource>,
        rule: Box<dyn CombinationRule>,
        policy: OutcomePolicy,
    ) -> Self {
        Self::new(rule, policy)
            .with_agent(Arc::new(IdentityConfirmationAgent::new(identity_provider)))
            .with_agent(Arc::new(ExplainableScoringAgent::new(model)))
            .with_agent(Arc::new(MarketContextAgent::new(context)))
    }

    pub fn with_agent(mut self, agent: Arc<dyn AssessmentAgent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    /// Run every stage in order against `session`.
    ///
    /// `cancelled` is checked before each stage; once set, the run stops and
    /// nothing it produced is returned.
    pub async fn run(
        &self,
        session: &Session,
        cancelled: &AtomicBool,
    ) -> Result<Verdict, PipelineError> {
        if self.agents.is_empty() {
            return Err(PipelineError::NoAgents);
        }
        let product = session.product().ok_or_else(|| PipelineError::AgentFailed {
            agent: self.agents[0].name().to_string(),
            cause: "no product selected".to_string(),
        })?;

        info!(
            session_id = %session.id(),
            product = %product,
            stages = self.agents.len(),
            "Starting risk assessment"
        );

        let shared = Arc::new(session.clone());
        let mut traces: Vec<AgentResult> = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let name = agent.name().to_string();
            if cancelled.load(Ordering::SeqCst) {
                debug!(agent = %name, "Assessment cancelled before stage");
                return Err(PipelineError::Cancelled { agent: name });
            }

            let result = self.evaluate_stage(agent, &shared, &traces).await;
            match result {
                Ok(r) => {
                    debug!(agent = %name, score = r.score(), "Stage committed");
                    traces.push(r);
                }
                Err(cause) => {
                    warn!(agent = %name, cause = %cause, "Stage failed, discarding traces");
                    return Err(PipelineError::AgentFailed { agent: name, cause });
                }
            }
        }

        let score = self.rule.combine(&traces);
        let outcome = self.policy.decide(product, score);
        let insight = advisor::insight(product, &traces);

        info!(
            session_id = %session.id(),
            rule = self.rule.name(),
            score,
            outcome = %outcome,
            "Assessment complete"
        );

        Ok(Verdict::new(outcome, score, self.rule.name(), traces, insight))
    }

    /// Each stage runs on its own task; a panic fails the stage.
    async fn evaluate_stage(
        &self,
        agent: &Arc<dyn AssessmentAgent>,
        session: &Arc<Session>,
        prior: &[AgentResult],
    ) -> Result<AgentResult, String> {
        let agent = Arc::clone(agent);
        let session = Arc::clone(session);
        let prior = prior.to_vec();
        let mut handle = tokio::spawn(async move { agent.evaluate(&session, &prior).await });

        let joined = match self.stage_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(format!("timed out after {}ms", limit.as_millis()));
                }
            },
            None => handle.await,
        };
        let result: Result<AgentResult, AgentError> = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => return Err("agent panicked".to_string()),
            Err(e) => return Err(format!("agent task ended early: {e}")),
        };
        result.map_err(|e| e.to_string())
    }
}
