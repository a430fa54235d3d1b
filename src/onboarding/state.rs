//! Onboarding step machine: the six stages an applicant walks through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The stages of the onboarding flow.
///
/// Progresses linearly: Identity → Product → Intake → Documents →
/// Assessment → Verdict. The only way back is a full reset to Identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Identity,
    Product,
    Intake,
    Documents,
    Assessment,
    Verdict,
}

impl Step {
    /// One-based step number as shown to the applicant.
    pub fn number(&self) -> u8 {
        match self {
            Self::Identity => 1,
            Self::Product => 2,
            Self::Intake => 3,
            Self::Documents => 4,
            Self::Assessment => 5,
            Self::Verdict => 6,
        }
    }

    /// Check if a forward transition from `self` to `target` is valid.
    ///
    /// Reset is not a transition in this sense and is always allowed.
    pub fn can_transition_to(&self, target: Step) -> bool {
        self.next() == Some(target)
    }

    /// Next step in the linear progression. `None` at Verdict, which only
    /// leaves through reset.
    pub fn next(&self) -> Option<Step> {
        use Step::*;
        match self {
            Identity => Some(Product),
            Product => Some(Intake),
            Intake => Some(Documents),
            Documents => Some(Assessment),
            Assessment => Some(Verdict),
            Verdict => None,
        }
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::Identity
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Identity => "identity",
            Self::Product => "product",
            Self::Intake => "intake",
            Self::Documents => "documents",
            Self::Assessment => "assessment",
            Self::Verdict => "verdict",
        };
        write!(f, "{s}")
    }
}

/// A committed step transition.
#[derive(Debug, Clone, Serialize)]
pub struct StepTransition {
    pub from: Step,
    pub to: Step,
    pub at: DateTime<Utc>,
}
