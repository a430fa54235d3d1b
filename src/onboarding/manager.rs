//! OnboardingManager owns the live session and is the only thing that
//! mutates it.
//!
//! Every forward move goes through [`OnboardingManager::advance`]: the
//! payload is applied to a staged copy, the gate is checked on that copy, and
//! the live session is replaced only when the gate passes. Entering step 5
//! runs the risk pipeline on its own task, which keeps the transition guard
//! until the result is settled into the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assessment::pipeline::RiskPipeline;
use crate::assessment::types::Verdict;
use crate::documents::DocumentCollaborator;
use crate::error::{OnboardingError, PipelineError};
use crate::identity::{
    IdentityVerifier, VerificationAdapter, VerificationOutcome, is_well_formed, normalize_raw_id,
};

use super::gate::{self, GateFailure};
use super::model::{
    AssessmentStatus, DocumentRef, IdentityState, IntakeForm, Product, Session, SessionView,
};
use super::state::Step;

/// Input that completes the current step.
///
/// Each variant names the step it moves the session into; anything other
/// than the immediate successor of the current step is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepPayload {
    /// Step 1 → 2. Identity must already be verified.
    ConfirmIdentity,
    /// Step 2 → 3.
    SelectProduct { product: Product },
    /// Step 3 → 4.
    SubmitIntake { intake: IntakeForm },
    /// Step 4 → 5, then straight into the assessment run.
    SubmitDocuments {
        #[serde(default)]
        documents: Vec<DocumentRef>,
    },
    /// Step 5 → 6. Re-runs the assessment after a failure.
    Assess,
}

impl StepPayload {
    /// Step this payload moves the session into.
    pub fn target(&self) -> Step {
        match self {
            Self::ConfirmIdentity => Step::Product,
            Self::SelectProduct { .. } => Step::Intake,
            Self::SubmitIntake { .. } => Step::Documents,
            Self::SubmitDocuments { .. } => Step::Assessment,
            Self::Assess => Step::Verdict,
        }
    }
}

/// Collaborators the manager is built from.
pub struct OnboardingDeps {
    pub verifier: Arc<dyn IdentityVerifier>,
    pub documents: Arc<dyn DocumentCollaborator>,
    pub pipeline: RiskPipeline,
    pub verify_timeout: Duration,
}

/// Live session plus the bookkeeping reset needs. Shared with the task that
/// runs an assessment.
struct Live {
    session: RwLock<Session>,
    /// Bumped on every reset. Work started under an older epoch is discarded.
    epoch: AtomicU64,
    /// Cancel flag of the assessment run in flight, if any.
    active_run: std::sync::Mutex<Option<Arc<AtomicBool>>>,
}

/// Coordinates one applicant's session: verification, gated transitions,
/// the assessment run and reset.
pub struct OnboardingManager {
    live: Arc<Live>,
    verification: VerificationAdapter,
    documents: Arc<dyn DocumentCollaborator>,
    pipeline: Arc<RiskPipeline>,
    /// Held for the whole of an `advance`, and by an assessment run until it
    /// settles. Contention is an error, not a queue.
    transition_lock: Arc<Mutex<()>>,
    /// At most one outstanding verification.
    verify_lock: Mutex<()>,
}

impl OnboardingManager {
    pub fn new(deps: OnboardingDeps) -> Self {
        Self {
            live: Arc::new(Live {
                session: RwLock::new(Session::new()),
                epoch: AtomicU64::new(0),
                active_run: std::sync::Mutex::new(None),
            }),
            verification: VerificationAdapter::new(deps.verifier, deps.verify_timeout),
            documents: deps.documents,
            pipeline: Arc::new(deps.pipeline),
            transition_lock: Arc::new(Mutex::new(())),
            verify_lock: Mutex::new(()),
        }
    }

    /// Owned copy of the live session.
    pub async fn snapshot(&self) -> Session {
        self.live.session.read().await.clone()
    }

    /// Read-only projection for presentation consumers.
    pub async fn view(&self) -> SessionView {
        self.live.session.read().await.view()
    }

    pub async fn current_step(&self) -> Step {
        self.live.session.read().await.step()
    }

    pub async fn session_id(&self) -> Uuid {
        self.live.session.read().await.id()
    }

    /// Verify the applicant's identity number with the collaborator.
    ///
    /// Only valid at step 1. The session stays readable while the call is
    /// outstanding; concurrent calls wait their turn. On success returns the
    /// verified display name.
    pub async fn verify(&self, raw_id: &str) -> Result<String, OnboardingError> {
        let _guard = self.verify_lock.lock().await;
        let epoch = self.live.epoch.load(Ordering::SeqCst);

        let step = self.current_step().await;
        if step != Step::Identity {
            return Err(OnboardingError::InvalidTransition {
                from: step,
                to: Step::Product,
            });
        }

        let raw_id = normalize_raw_id(raw_id);
        if !is_well_formed(&raw_id) {
            debug!(len = raw_id.len(), "Rejected malformed identity number");
            return Err(OnboardingError::Validation {
                step: Step::Identity,
                unmet: GateFailure::IdentityMalformed,
            });
        }

        let outcome = self.verification.verify(&raw_id).await;

        // Identity must not land between an advance's snapshot and its commit
        let _transition = self.transition_lock.lock().await;
        let mut session = self.live.session.write().await;
        if self.live.epoch.load(Ordering::SeqCst) != epoch {
            info!("Session reset during verification, discarding result");
            return Err(OnboardingError::Cancelled);
        }
        if session.step != Step::Identity {
            return Err(OnboardingError::InvalidTransition {
                from: session.step,
                to: Step::Product,
            });
        }

        match outcome {
            VerificationOutcome::Verified {
                display_name,
                confidence,
            } => {
                session.identity = IdentityState {
                    raw_id: SecretString::from(raw_id),
                    verified: true,
                    display_name: Some(display_name.clone()),
                    confidence,
                };
                info!(
                    session_id = %session.id,
                    masked_id = %session.identity.masked_id(),
                    "Identity recorded"
                );
                Ok(display_name)
            }
            VerificationOutcome::Failed { reason } => {
                session.identity = IdentityState {
                    raw_id: SecretString::from(raw_id),
                    ..IdentityState::default()
                };
                Err(OnboardingError::VerificationFailed { reason })
            }
        }
    }

    /// Complete the current step with `payload` and move to its successor.
    ///
    /// Returns the step the session ends on. When the payload enters step 5
    /// this awaits the assessment run and, on success, ends at step 6.
    pub async fn advance(&self, payload: StepPayload) -> Result<Step, OnboardingError> {
        let guard = Arc::clone(&self.transition_lock)
            .try_lock_owned()
            .map_err(|_| {
                warn!("Transition rejected: another is in progress");
                OnboardingError::ConcurrentTransition
            })?;
        let epoch = self.live.epoch.load(Ordering::SeqCst);

        let mut staged = self.snapshot().await;
        let from = staged.step;
        let to = payload.target();
        if !from.can_transition_to(to) {
            warn!(from = %from, to = %to, "Invalid transition requested");
            return Err(OnboardingError::InvalidTransition { from, to });
        }

        if to == Step::Verdict {
            return self.run_assessment(guard, epoch).await;
        }

        self.apply(&mut staged, payload).await;
        if let Err(unmet) = gate::check(&staged) {
            info!(step = %from, unmet = %unmet, "Gate unmet");
            return Err(OnboardingError::Validation { step: from, unmet });
        }
        staged.enter(to);
        if to == Step::Assessment {
            staged.assessment = AssessmentStatus::Idle;
        }
        self.commit(staged, epoch).await?;
        info!(from = %from, to = %to, "Step advanced");

        if to == Step::Assessment {
            return self.run_assessment(guard, epoch).await;
        }
        Ok(to)
    }

    /// Discard everything and start a fresh session at step 1.
    ///
    /// Never blocked by an in-flight transition. An outstanding assessment
    /// run is cancelled and its result will not be applied.
    pub async fn reset(&self) -> Uuid {
        let mut session = self.live.session.write().await;
        self.live.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(run) = self.live.take_active_run() {
            run.store(true, Ordering::SeqCst);
            info!(session_id = %session.id, "Cancelled outstanding assessment");
        }
        let previous = session.id;
        *session = Session::new();
        info!(previous = %previous, session_id = %session.id, "Session reset");
        session.id
    }

    async fn apply(&self, staged: &mut Session, payload: StepPayload) {
        match payload {
            StepPayload::ConfirmIdentity | StepPayload::Assess => {}
            StepPayload::SelectProduct { product } => staged.product = Some(product),
            StepPayload::SubmitIntake { intake } => staged.intake = Some(intake),
            StepPayload::SubmitDocuments { documents } => {
                staged.documents.extend(documents);
                if staged.documents.is_empty() {
                    staged.documents_signalled = self.documents.has_document(staged.id).await;
                }
            }
        }
    }

    /// Replace the live session unless a reset happened since `epoch`.
    async fn commit(&self, staged: Session, epoch: u64) -> Result<(), OnboardingError> {
        let mut session = self.live.session.write().await;
        if self.live.epoch.load(Ordering::SeqCst) != epoch {
            return Err(OnboardingError::Cancelled);
        }
        *session = staged;
        Ok(())
    }

    /// Run the pipeline for the session at step 5 and settle the outcome.
    ///
    /// The run is detached from the caller and owns `guard`, so dropping the
    /// returned future still settles the session and blocks other
    /// transitions until it does.
    async fn run_assessment(
        &self,
        guard: OwnedMutexGuard<()>,
        epoch: u64,
    ) -> Result<Step, OnboardingError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let snapshot = {
            let mut session = self.live.session.write().await;
            if self.live.epoch.load(Ordering::SeqCst) != epoch {
                return Err(OnboardingError::Cancelled);
            }
            session.assessment = AssessmentStatus::Running;
            session.verdict = None;
            self.live.set_active_run(Some(Arc::clone(&cancel)));
            session.clone()
        };

        let live = Arc::clone(&self.live);
        let pipeline = Arc::clone(&self.pipeline);
        let run = {
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                let _guard = guard;
                let result = pipeline.run(&snapshot, &cancel).await;
                live.settle(snapshot.id, &cancel, epoch, result).await
            })
        };

        match run.await {
            Ok(settled) => settled,
            Err(e) => {
                let error = PipelineError::Interrupted {
                    cause: e.to_string(),
                };
                warn!(error = %error, "Assessment task ended without settling");
                self.live.clear_active_run(&cancel);
                let mut session = self.live.session.write().await;
                if self.live.epoch.load(Ordering::SeqCst) != epoch {
                    return Err(OnboardingError::Cancelled);
                }
                session.assessment = AssessmentStatus::Failed {
                    agent: None,
                    cause: error.to_string(),
                };
                Err(OnboardingError::Pipeline(error))
            }
        }
    }
}

impl Live {
    /// Apply a finished run: the verdict together with step 6, or the
    /// failure at step 5. Discarded if the session was reset meanwhile.
    async fn settle(
        &self,
        session_id: Uuid,
        cancel: &Arc<AtomicBool>,
        epoch: u64,
        result: Result<Verdict, PipelineError>,
    ) -> Result<Step, OnboardingError> {
        let mut session = self.session.write().await;
        self.clear_active_run(cancel);
        if cancel.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
            info!(session_id = %session_id, "Assessment result discarded after reset");
            return Err(OnboardingError::Cancelled);
        }

        match result {
            Ok(verdict) => {
                let mut staged = session.clone();
                staged.verdict = Some(verdict);
                if let Err(unmet) = gate::check(&staged) {
                    return Err(OnboardingError::Validation {
                        step: Step::Assessment,
                        unmet,
                    });
                }
                staged.enter(Step::Verdict);
                staged.assessment = AssessmentStatus::Complete;
                *session = staged;
                info!(session_id = %session.id, "Verdict issued");
                Ok(Step::Verdict)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Assessment failed");
                session.assessment = AssessmentStatus::Failed {
                    agent: e.agent().map(String::from),
                    cause: e.to_string(),
                };
                Err(OnboardingError::Pipeline(e))
            }
        }
    }

    fn set_active_run(&self, run: Option<Arc<AtomicBool>>) {
        let mut slot = self.active_run.lock().unwrap_or_else(|e| e.into_inner());
        *slot = run;
    }

    fn take_active_run(&self) -> Option<Arc<AtomicBool>> {
        self.active_run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn clear_active_run(&self, run: &Arc<AtomicBool>) {
        let mut slot = self.active_run.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, run)) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::assessment::combine::{ClippedSum, OutcomePolicy};
    use crate::assessment::types::{AgentResult, AssessmentAgent};
    use crate::documents::InMemoryDocuments;
    use crate::error::AgentError;
    use crate::identity::IdentityCheck;
    use crate::onboarding::model::LoanIntake;

    struct AcceptAll;

    #[async_trait]
    impl IdentityVerifier for AcceptAll {
        fn name(&self) -> &str {
            "stub"
        }
        async fn verify(&self, _raw_id: &str) -> Result<IdentityCheck, String> {
            Ok(IdentityCheck {
                verified: true,
                display_name: Some("Spoorthy".into()),
                reason: None,
                confidence: Some(97),
            })
        }
    }

    struct ScoreOnly(i32);

    #[async_trait]
    impl AssessmentAgent for ScoreOnly {
        fn name(&self) -> &str {
            "score-only"
        }
        async fn evaluate(
            &self,
            _session: &Session,
            _prior: &[AgentResult],
        ) -> Result<AgentResult, AgentError> {
            Ok(AgentResult::new("score-only", self.0, "fixed score")?)
        }
    }

    fn manager_with(documents: Arc<InMemoryDocuments>) -> OnboardingManager {
        OnboardingManager::new(OnboardingDeps {
            verifier: Arc::new(AcceptAll),
            documents,
            pipeline: RiskPipeline::new(Box::new(ClippedSum), OutcomePolicy::default())
                .with_agent(Arc::new(ScoreOnly(80))),
            verify_timeout: Duration::from_secs(1),
        })
    }

    fn manager() -> OnboardingManager {
        manager_with(Arc::new(InMemoryDocuments::new()))
    }

    fn loan_intake() -> IntakeForm {
        IntakeForm::Loan(LoanIntake {
            annual_income: Some(dec!(1500000)),
            requested_amount: Some(dec!(5000000)),
            credit_score: None,
        })
    }

    #[test]
    fn payload_targets_are_successors() {
        assert_eq!(StepPayload::ConfirmIdentity.target(), Step::Product);
        assert_eq!(StepPayload::Assess.target(), Step::Verdict);
        assert_eq!(
            StepPayload::SubmitDocuments { documents: vec![] }.target(),
            Step::Assessment
        );
    }

    #[test]
    fn payload_deserializes_from_tagged_json() {
        let p: StepPayload =
            serde_json::from_str(r#"{"action":"select_product","product":"HEALTH"}"#).unwrap();
        assert!(matches!(p, StepPayload::SelectProduct { product: Product::Health }));

        let p: StepPayload = serde_json::from_str(
            r#"{"action":"submit_intake","intake":{"product":"LOAN","annual_income":"1500000","requested_amount":"5000000"}}"#,
        )
        .unwrap();
        assert_eq!(p.target(), Step::Documents);

        let p: StepPayload = serde_json::from_str(r#"{"action":"submit_documents"}"#).unwrap();
        assert!(matches!(p, StepPayload::SubmitDocuments { documents } if documents.is_empty()));
    }

    #[tokio::test]
    async fn confirm_requires_verified_identity() {
        let m = manager();
        let err = m.advance(StepPayload::ConfirmIdentity).await.unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Validation {
                step: Step::Identity,
                unmet: GateFailure::IdentityMalformed
            }
        ));
        assert_eq!(m.current_step().await, Step::Identity);

        assert_eq!(m.verify("0123 4567 8901").await.unwrap(), "Spoorthy");
        assert_eq!(m.advance(StepPayload::ConfirmIdentity).await.unwrap(), Step::Product);
        let view = m.view().await;
        assert_eq!(view.identity.masked_id, "XXXX XXXX 8901");
        assert_eq!(view.transitions.len(), 1);
    }

    #[tokio::test]
    async fn jumps_are_invalid_transitions() {
        let m = manager();
        let err = m
            .advance(StepPayload::SelectProduct {
                product: Product::Loan,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::InvalidTransition {
                from: Step::Identity,
                to: Step::Intake
            }
        ));
    }

    #[tokio::test]
    async fn verify_only_at_identity_step() {
        let m = manager();
        m.verify("012345678901").await.unwrap();
        m.advance(StepPayload::ConfirmIdentity).await.unwrap();
        let err = m.verify("012345678901").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn verify_result_waits_for_in_flight_transition() {
        let m = Arc::new(manager());
        let held = m.transition_lock.lock().await;

        let verifier = Arc::clone(&m);
        let pending = tokio::spawn(async move { verifier.verify("012345678901").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert!(!m.view().await.identity.verified);

        drop(held);
        assert_eq!(pending.await.unwrap().unwrap(), "Spoorthy");
        assert!(m.view().await.identity.verified);
    }

    #[tokio::test]
    async fn document_signal_satisfies_gate() {
        let docs = Arc::new(InMemoryDocuments::new());
        let m = manager_with(Arc::clone(&docs));
        m.verify("012345678901").await.unwrap();
        m.advance(StepPayload::ConfirmIdentity).await.unwrap();
        m.advance(StepPayload::SelectProduct {
            product: Product::Loan,
        })
        .await
        .unwrap();
        m.advance(StepPayload::SubmitIntake {
            intake: loan_intake(),
        })
        .await
        .unwrap();

        let err = m
            .advance(StepPayload::SubmitDocuments { documents: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Validation {
                unmet: GateFailure::DocumentsMissing,
                ..
            }
        ));

        docs.mark_received(m.session_id().await).await;
        let step = m
            .advance(StepPayload::SubmitDocuments { documents: vec![] })
            .await
            .unwrap();
        assert_eq!(step, Step::Verdict);
        let session = m.snapshot().await;
        assert!(session.documents_signalled());
        assert_eq!(session.verdict().map(|v| v.score()), Some(80));
        assert_eq!(session.assessment(), &AssessmentStatus::Complete);
    }

    #[tokio::test]
    async fn reset_issues_new_session() {
        let m = manager();
        let before = m.view().await;
        m.verify("012345678901").await.unwrap();
        let after = m.reset().await;
        assert_ne!(before.id, after);
        let view = m.view().await;
        assert!(view.created_at >= before.created_at);
        assert_eq!(view.step, Step::Identity);
        assert!(!view.identity.verified);
        assert!(view.transitions.is_empty());
    }
}
