//! Session data model and its read-only projection.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assessment::types::Verdict;

use super::state::{Step, StepTransition};

/// Cap on retained transition history.
const MAX_TRANSITIONS: usize = 32;

/// The product track ("shield") the applicant is onboarding into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Product {
    Loan,
    Health,
}

impl Product {
    /// Human-facing shield name.
    pub fn shield_name(&self) -> &'static str {
        match self {
            Self::Loan => "Loan Shield",
            Self::Health => "Health Shield",
        }
    }

    /// What the applicant is asked to upload at step 4.
    pub fn document_hint(&self) -> &'static str {
        match self {
            Self::Loan => "Bank Statements",
            Self::Health => "Health Reports",
        }
    }
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loan => write!(f, "LOAN"),
            Self::Health => write!(f, "HEALTH"),
        }
    }
}

/// Identity entry and the result of the last verification.
///
/// The raw identifier is held as a secret and only ever shown masked.
#[derive(Debug)]
pub struct IdentityState {
    pub(crate) raw_id: SecretString,
    pub(crate) verified: bool,
    pub(crate) display_name: Option<String>,
    /// Confidence reported by the identity collaborator, 0..=100.
    pub(crate) confidence: u8,
}

impl IdentityState {
    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub(crate) fn raw_id(&self) -> &str {
        self.raw_id.expose_secret()
    }

    /// `XXXX XXXX 8901` style rendering; empty when nothing was entered.
    pub fn masked_id(&self) -> String {
        mask_id(self.raw_id())
    }
}

impl Default for IdentityState {
    fn default() -> Self {
        Self {
            raw_id: SecretString::from(String::new()),
            verified: false,
            display_name: None,
            confidence: 0,
        }
    }
}

impl Clone for IdentityState {
    fn clone(&self) -> Self {
        Self {
            raw_id: SecretString::from(self.raw_id().to_owned()),
            verified: self.verified,
            display_name: self.display_name.clone(),
            confidence: self.confidence,
        }
    }
}

fn mask_id(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let visible = raw.len().saturating_sub(4);
    let masked: String = raw
        .chars()
        .enumerate()
        .map(|(i, c)| if i < visible { 'X' } else { c })
        .collect();
    masked
        .as_bytes()
        .chunks(4)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Loan intake. Amounts are in INR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanIntake {
    #[serde(default)]
    pub annual_income: Option<Decimal>,
    #[serde(default)]
    pub requested_amount: Option<Decimal>,
    /// CIBIL credit score (300..=900), when the applicant shares it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_score: Option<u16>,
}

/// Health intake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthIntake {
    #[serde(default)]
    pub height_cm: Option<Decimal>,
    #[serde(default)]
    pub weight_kg: Option<Decimal>,
    #[serde(default)]
    pub smoker: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_years: Option<u32>,
}

/// Product-specific intake form captured at step 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "product", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntakeForm {
    Loan(LoanIntake),
    Health(HealthIntake),
}

impl IntakeForm {
    pub fn product(&self) -> Product {
        match self {
            Self::Loan(_) => Product::Loan,
            Self::Health(_) => Product::Health,
        }
    }
}

/// Opaque handle to an uploaded artifact. Content is never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: Uuid,
    pub label: String,
}

impl DocumentRef {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }
}

/// Progress of the risk assessment run at step 5.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssessmentStatus {
    Idle,
    Running,
    Failed { agent: Option<String>, cause: String },
    Complete,
}

/// One applicant's onboarding session.
///
/// Fields are only mutated by `OnboardingManager`; everything else reads it.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) id: Uuid,
    pub(crate) step: Step,
    pub(crate) product: Option<Product>,
    pub(crate) identity: IdentityState,
    pub(crate) intake: Option<IntakeForm>,
    pub(crate) documents: Vec<DocumentRef>,
    /// The document collaborator reported a received upload.
    pub(crate) documents_signalled: bool,
    pub(crate) assessment: AssessmentStatus,
    pub(crate) verdict: Option<Verdict>,
    pub(crate) transitions: Vec<StepTransition>,
    pub(crate) created_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session at step 1 with every optional field unset.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            step: Step::Identity,
            product: None,
            identity: IdentityState::default(),
            intake: None,
            documents: Vec::new(),
            documents_signalled: false,
            assessment: AssessmentStatus::Idle,
            verdict: None,
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn product(&self) -> Option<Product> {
        self.product
    }

    pub fn identity(&self) -> &IdentityState {
        &self.identity
    }

    pub fn intake(&self) -> Option<&IntakeForm> {
        self.intake.as_ref()
    }

    pub fn documents(&self) -> &[DocumentRef] {
        &self.documents
    }

    pub fn documents_signalled(&self) -> bool {
        self.documents_signalled
    }

    pub fn assessment(&self) -> &AssessmentStatus {
        &self.assessment
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn transitions(&self) -> &[StepTransition] {
        &self.transitions
    }

    /// Move to `to` and record the transition.
    pub(crate) fn enter(&mut self, to: Step) {
        self.transitions.push(StepTransition {
            from: self.step,
            to,
            at: Utc::now(),
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }
        self.step = to;
    }

    /// Read-only projection for presentation consumers.
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            step: self.step,
            step_number: self.step.number(),
            product: self.product,
            identity: IdentityView {
                masked_id: self.identity.masked_id(),
                verified: self.identity.verified,
                display_name: self.identity.display_name.clone(),
            },
            intake: self.intake.clone(),
            document_count: self.documents.len(),
            documents_signalled: self.documents_signalled,
            assessment: self.assessment.clone(),
            verdict: self.verdict.clone(),
            transitions: self.transitions.clone(),
            created_at: self.created_at,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity as shown to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityView {
    pub masked_id: String,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Serialisable, read-only projection of a `Session`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub step: Step,
    pub step_number: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
    pub identity: IdentityView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake: Option<IntakeForm>,
    pub document_count: usize,
    pub documents_signalled: bool,
    pub assessment: AssessmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub transitions: Vec<StepTransition>,
    pub created_at: DateTime<Utc>,
}
