//! Error types for Kavach.

use crate::onboarding::gate::GateFailure;
use crate::onboarding::state::Step;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors surfaced at the onboarding boundary.
///
/// Every failure leaves the session at its last valid step.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    /// The current step's gate is unmet. The applicant has to supply the
    /// missing input.
    #[error("Step {step} cannot advance: {unmet}")]
    Validation { step: Step, unmet: GateFailure },

    /// A transition other than the immediate successor was requested.
    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: Step, to: Step },

    /// Another transition is already in flight for this session.
    #[error("Another transition is already in progress")]
    ConcurrentTransition,

    #[error("Assessment failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Identity verification failed: {reason}")]
    VerificationFailed { reason: String },

    /// The session was reset while the operation was outstanding; its result
    /// was discarded.
    #[error("Session was reset; result discarded")]
    Cancelled,
}

impl OnboardingError {
    /// Stable machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ConcurrentTransition => "concurrent_transition",
            Self::Pipeline(_) => "pipeline",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Risk assessment pipeline errors. Always names the failing agent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Agent {agent} failed: {cause}")]
    AgentFailed { agent: String, cause: String },

    #[error("Run cancelled before agent {agent} started")]
    Cancelled { agent: String },

    #[error("No assessment agents configured")]
    NoAgents,

    /// The task driving the run ended without settling the session.
    #[error("Assessment run was interrupted: {cause}")]
    Interrupted { cause: String },
}

impl PipelineError {
    /// Name of the agent the failure is attributed to, if any.
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::AgentFailed { agent, .. } | Self::Cancelled { agent } => Some(agent),
            Self::NoAgents | Self::Interrupted { .. } => None,
        }
    }
}

/// Failure of a single assessment agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("Upstream collaborator failed: {0}")]
    Upstream(String),
}

/// Explainability contract violations, raised when building an `AgentResult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    #[error("Agent {agent} produced a score without a narrative")]
    MissingNarrative { agent: String },

    #[error("Agent {agent} produced score {score}, outside -100..=100")]
    ScoreOutOfRange { agent: String, score: i32 },

    #[error("Agent name must not be empty")]
    MissingAgentName,
}

/// Scoring collaborator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoringError {
    #[error("Missing feature: {0}")]
    MissingFeature(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model returned a score without contributions")]
    Unexplained,

    #[error("Scoring backend failed: {0}")]
    Backend(String),
}
