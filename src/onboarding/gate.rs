//! Validation gate. Decides whether the current step may advance.
//!
//! The gate is a pure function of a session. The transition engine calls it
//! on a staged copy with the step's payload already applied, so a failing
//! gate never touches the live session.

use rust_decimal::Decimal;

use crate::identity::is_well_formed;

use super::model::{IntakeForm, Product, Session};
use super::state::Step;

/// Credit score bounds (CIBIL).
const CREDIT_SCORE_RANGE: std::ops::RangeInclusive<u16> = 300..=900;

/// Why a gate is unmet. Rendered as a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateFailure {
    IdentityMalformed,
    IdentityUnverified,
    ProductUnset,
    IntakeMissing,
    IntakeProductMismatch { expected: Product, got: Product },
    IntakeFieldMissing { field: &'static str },
    IntakeFieldNegative { field: &'static str },
    IntakeFieldOutOfRange { field: &'static str },
    DocumentsMissing,
    VerdictMissing,
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentityMalformed => write!(f, "identity number must be exactly 12 digits"),
            Self::IdentityUnverified => write!(f, "identity has not been verified"),
            Self::ProductUnset => write!(f, "no product selected"),
            Self::IntakeMissing => write!(f, "intake form not submitted"),
            Self::IntakeProductMismatch { expected, got } => {
                write!(f, "intake is for {got} but the selected product is {expected}")
            }
            Self::IntakeFieldMissing { field } => write!(f, "{field} is required"),
            Self::IntakeFieldNegative { field } => write!(f, "{field} must not be negative"),
            Self::IntakeFieldOutOfRange { field } => write!(f, "{field} is out of range"),
            Self::DocumentsMissing => write!(f, "no document has been received"),
            Self::VerdictMissing => write!(f, "assessment has not produced a verdict"),
        }
    }
}

/// Evaluate the advance condition of `session.step()`.
///
/// Idempotent and side-effect free. Verdict has no outgoing gate; it only
/// leaves through reset, which is not gated.
pub fn check(session: &Session) -> Result<(), GateFailure> {
    match session.step() {
        Step::Identity => check_identity(session),
        Step::Product => session.product().map(|_| ()).ok_or(GateFailure::ProductUnset),
        Step::Intake => check_intake(session),
        Step::Documents => {
            if session.documents().is_empty() && !session.documents_signalled() {
                Err(GateFailure::DocumentsMissing)
            } else {
                Ok(())
            }
        }
        Step::Assessment => session.verdict().map(|_| ()).ok_or(GateFailure::VerdictMissing),
        Step::Verdict => Ok(()),
    }
}

fn check_identity(session: &Session) -> Result<(), GateFailure> {
    let identity = session.identity();
    if !is_well_formed(identity.raw_id()) {
        return Err(GateFailure::IdentityMalformed);
    }
    if !identity.verified() {
        return Err(GateFailure::IdentityUnverified);
    }
    Ok(())
}

fn check_intake(session: &Session) -> Result<(), GateFailure> {
    let product = session.product().ok_or(GateFailure::ProductUnset)?;
    let intake = session.intake().ok_or(GateFailure::IntakeMissing)?;
    if intake.product() != product {
        return Err(GateFailure::IntakeProductMismatch {
            expected: product,
            got: intake.product(),
        });
    }

    match intake {
        IntakeForm::Loan(loan) => {
            require_non_negative("annual_income", loan.annual_income)?;
            require_non_negative("requested_amount", loan.requested_amount)?;
            if let Some(score) = loan.credit_score
                && !CREDIT_SCORE_RANGE.contains(&score)
            {
                return Err(GateFailure::IntakeFieldOutOfRange {
                    field: "credit_score",
                });
            }
        }
        IntakeForm::Health(health) => {
            require_non_negative("height_cm", health.height_cm)?;
            require_non_negative("weight_kg", health.weight_kg)?;
        }
    }
    Ok(())
}

fn require_non_negative(field: &'static str, value: Option<Decimal>) -> Result<(), GateFailure> {
    match value {
        None => Err(GateFailure::IntakeFieldMissing { field }),
        Some(v) if v.is_sign_negative() && !v.is_zero() => {
            Err(GateFailure::IntakeFieldNegative { field })
        }
        Some(_) => Ok(()),
    }
}
