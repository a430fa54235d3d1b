//! Onboarding system — the six-step applicant flow.
//!
//! The session moves linearly through identity, product, intake, documents,
//! assessment and verdict. `OnboardingManager` owns it and is the only thing
//! allowed to change it; everything else reads a `SessionView`.

pub mod gate;
pub mod manager;
pub mod model;
pub mod routes;
pub mod state;

pub use gate::GateFailure;
pub use manager::{OnboardingDeps, OnboardingManager, StepPayload};
pub use model::{
    AssessmentStatus, DocumentRef, HealthIntake, IntakeForm, LoanIntake, Product, Session,
    SessionView,
};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::{Step, StepTransition};
