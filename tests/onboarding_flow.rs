//! Integration tests for the onboarding flow.
//!
//! Each test builds a manager from stub or demo collaborators and drives it
//! through the public API only.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Notify;
use tokio::time::timeout;

use kavach::assessment::agents::{IDENTITY_AGENT, MARKET_AGENT, SCORING_AGENT};
use kavach::assessment::{
    AgentResult, AssessmentAgent, ClippedSum, GlassBoxModel, Outcome, OutcomePolicy,
    RiskPipeline, StaticMarketContext, WeightedBlend,
};
use kavach::documents::InMemoryDocuments;
use kavach::error::{AgentError, OnboardingError, PipelineError};
use kavach::identity::{DemoVerifier, IdentityCheck, IdentityVerifier};
use kavach::onboarding::{
    AssessmentStatus, DocumentRef, GateFailure, HealthIntake, IntakeForm, LoanIntake,
    OnboardingDeps, OnboardingManager, Product, Session, Step, StepPayload,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocks in `evaluate` until released, so tests can act mid-pipeline.
struct GatedAgent {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl AssessmentAgent for GatedAgent {
    fn name(&self) -> &str {
        "gated"
    }
    async fn evaluate(
        &self,
        _session: &Session,
        _prior: &[AgentResult],
    ) -> Result<AgentResult, AgentError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(AgentResult::new("gated", 70, "released by test")?)
    }
}

/// Identity backend that blocks in `verify` until released.
struct GatedVerifier {
    calls: AtomicUsize,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedVerifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        })
    }
}

#[async_trait]
impl IdentityVerifier for GatedVerifier {
    fn name(&self) -> &str {
        "gated-ekyc"
    }
    async fn verify(&self, _raw_id: &str) -> Result<IdentityCheck, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(IdentityCheck {
            verified: true,
            display_name: Some("Spoorthy".into()),
            confidence: Some(100),
            reason: None,
        })
    }
}

/// Fails on its first call, succeeds afterwards.
struct FlakyAgent {
    calls: AtomicUsize,
}

#[async_trait]
impl AssessmentAgent for FlakyAgent {
    fn name(&self) -> &str {
        "flaky"
    }
    async fn evaluate(
        &self,
        _session: &Session,
        _prior: &[AgentResult],
    ) -> Result<AgentResult, AgentError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(AgentError::Upstream("model warming up".into()));
        }
        Ok(AgentResult::new("flaky", 90, "second attempt succeeded")?)
    }
}

fn standard_pipeline() -> RiskPipeline {
    RiskPipeline::standard(
        "demo-ekyc",
        Arc::new(GlassBoxModel::new()),
        Arc::new(StaticMarketContext::new(-12, -5)),
        Box::new(WeightedBlend::default()),
        OutcomePolicy::default(),
    )
}

fn manager(pipeline: RiskPipeline) -> Arc<OnboardingManager> {
    manager_verified_by(Arc::new(DemoVerifier::new("Spoorthy")), pipeline)
}

fn manager_verified_by(
    verifier: Arc<dyn IdentityVerifier>,
    pipeline: RiskPipeline,
) -> Arc<OnboardingManager> {
    Arc::new(OnboardingManager::new(OnboardingDeps {
        verifier,
        documents: Arc::new(InMemoryDocuments::new()),
        pipeline,
        verify_timeout: TEST_TIMEOUT,
    }))
}

fn gated() -> (RiskPipeline, Arc<Notify>, Arc<Notify>) {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let pipeline = RiskPipeline::new(Box::new(ClippedSum), OutcomePolicy::default()).with_agent(
        Arc::new(GatedAgent {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }),
    );
    (pipeline, started, release)
}

fn scenario_b_intake() -> IntakeForm {
    IntakeForm::Loan(LoanIntake {
        annual_income: Some(dec!(1500000)),
        requested_amount: Some(dec!(5000000)),
        credit_score: None,
    })
}

/// Drive a fresh session to step 4 with a loan intake.
async fn to_documents(m: &OnboardingManager) {
    to_documents_with(m, scenario_b_intake()).await;
}

/// Drive a fresh session to step 4 with `intake`.
async fn to_documents_with(m: &OnboardingManager, intake: IntakeForm) {
    m.verify("012345678901").await.unwrap();
    m.advance(StepPayload::ConfirmIdentity).await.unwrap();
    m.advance(StepPayload::SelectProduct {
        product: intake.product(),
    })
    .await
    .unwrap();
    m.advance(StepPayload::SubmitIntake { intake }).await.unwrap();
    assert_eq!(m.current_step().await, Step::Documents);
}

fn statement() -> StepPayload {
    StepPayload::SubmitDocuments {
        documents: vec![DocumentRef::new("bank-statement.pdf")],
    }
}

#[tokio::test]
async fn loan_flow_reaches_explained_verdict() {
    let m = manager(standard_pipeline());
    let mut steps = vec![m.current_step().await];

    m.verify("012345678901").await.unwrap();
    for payload in [
        StepPayload::ConfirmIdentity,
        StepPayload::SelectProduct {
            product: Product::Loan,
        },
        StepPayload::SubmitIntake {
            intake: scenario_b_intake(),
        },
        statement(),
    ] {
        m.advance(payload).await.unwrap();
        steps.push(m.current_step().await);
    }

    assert!(steps.windows(2).all(|w| w[0] <= w[1]), "{steps:?}");
    assert_eq!(steps.last(), Some(&Step::Verdict));

    let session = m.snapshot().await;
    let verdict = session.verdict().expect("verdict at step 6");
    assert_eq!(verdict.outcome(), &Outcome::Approved);
    let agents: Vec<_> = verdict.traces().iter().map(|t| t.agent_name()).collect();
    assert_eq!(agents, [IDENTITY_AGENT, SCORING_AGENT, MARKET_AGENT]);
    assert!(verdict.traces().iter().all(|t| !t.narrative().trim().is_empty()));
    assert_eq!(session.assessment(), &AssessmentStatus::Complete);
    assert_eq!(session.transitions().len(), 5);
}

#[tokio::test]
async fn health_flow_quotes_a_premium() {
    let m = manager(standard_pipeline());
    m.verify("012345678901").await.unwrap();
    m.advance(StepPayload::ConfirmIdentity).await.unwrap();
    m.advance(StepPayload::SelectProduct {
        product: Product::Health,
    })
    .await
    .unwrap();
    m.advance(StepPayload::SubmitIntake {
        intake: IntakeForm::Health(HealthIntake {
            height_cm: Some(dec!(175)),
            weight_kg: Some(dec!(70)),
            smoker: false,
            age_years: Some(42),
        }),
    })
    .await
    .unwrap();
    m.advance(statement()).await.unwrap();

    let view = m.view().await;
    assert_eq!(view.step_number, 6);
    let verdict = view.verdict.expect("verdict");
    assert_eq!(
        verdict.outcome(),
        &Outcome::Premium {
            amount: dec!(13600)
        }
    );
    assert_eq!(verdict.outcome().to_string(), "₹13,600");
}

#[tokio::test]
async fn malformed_identity_is_rejected() {
    let m = manager(standard_pipeline());
    let err = m.verify("123").await.unwrap_err();
    assert!(matches!(
        err,
        OnboardingError::Validation {
            step: Step::Identity,
            unmet: GateFailure::IdentityMalformed
        }
    ));
    let err = m.advance(StepPayload::ConfirmIdentity).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(m.current_step().await, Step::Identity);
}

#[tokio::test]
async fn failed_verification_can_be_retried() {
    let m = manager(standard_pipeline());
    let err = m.verify("111111111111").await.unwrap_err();
    assert!(matches!(err, OnboardingError::VerificationFailed { .. }));
    assert!(!m.view().await.identity.verified);

    m.verify("012345678901").await.unwrap();
    assert_eq!(m.advance(StepPayload::ConfirmIdentity).await.unwrap(), Step::Product);
}

#[tokio::test]
async fn gate_failure_leaves_session_unchanged() {
    let m = manager(standard_pipeline());
    m.verify("012345678901").await.unwrap();
    m.advance(StepPayload::ConfirmIdentity).await.unwrap();
    m.advance(StepPayload::SelectProduct {
        product: Product::Loan,
    })
    .await
    .unwrap();
    let before = m.view().await;

    let err = m
        .advance(StepPayload::SubmitIntake {
            intake: IntakeForm::Loan(LoanIntake {
                annual_income: Some(dec!(1500000)),
                requested_amount: None,
                credit_score: None,
            }),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OnboardingError::Validation {
            step: Step::Intake,
            unmet: GateFailure::IntakeFieldMissing {
                field: "requested_amount"
            }
        }
    ));

    let err = m
        .advance(StepPayload::SubmitIntake {
            intake: IntakeForm::Health(HealthIntake::default()),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OnboardingError::Validation {
            unmet: GateFailure::IntakeProductMismatch { .. },
            ..
        }
    ));

    let after = m.view().await;
    assert_eq!(after.step, before.step);
    assert!(after.intake.is_none());
    assert_eq!(after.transitions.len(), before.transitions.len());
}

#[tokio::test]
async fn direct_jumps_are_rejected() {
    let m = manager(standard_pipeline());
    to_documents(&m).await;
    let err = m.advance(StepPayload::Assess).await.unwrap_err();
    assert!(matches!(
        err,
        OnboardingError::InvalidTransition {
            from: Step::Documents,
            to: Step::Verdict
        }
    ));
    let err = m
        .advance(StepPayload::SelectProduct {
            product: Product::Health,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");
    assert_eq!(m.snapshot().await.product(), Some(Product::Loan));
}

#[tokio::test]
async fn second_advance_during_assessment_is_rejected() {
    let (pipeline, started, release) = gated();
    let m = manager(pipeline);
    to_documents(&m).await;

    let runner = Arc::clone(&m);
    let run = tokio::spawn(async move { runner.advance(statement()).await });
    timeout(TEST_TIMEOUT, started.notified()).await.unwrap();

    let err = m.advance(StepPayload::Assess).await.unwrap_err();
    assert!(matches!(err, OnboardingError::ConcurrentTransition));

    // Reads are not blocked while the run is outstanding
    let view = m.view().await;
    assert_eq!(view.step, Step::Assessment);
    assert_eq!(view.assessment, AssessmentStatus::Running);
    assert!(view.verdict.is_none());

    release.notify_one();
    let step = timeout(TEST_TIMEOUT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(step, Step::Verdict);
    assert_eq!(m.snapshot().await.verdict().map(|v| v.score()), Some(70));
}

#[tokio::test]
async fn reset_mid_pipeline_discards_the_result() {
    let (pipeline, started, release) = gated();
    let m = manager(pipeline);
    to_documents(&m).await;
    let old_id = m.session_id().await;

    let runner = Arc::clone(&m);
    let run = tokio::spawn(async move { runner.advance(statement()).await });
    timeout(TEST_TIMEOUT, started.notified()).await.unwrap();

    let new_id = m.reset().await;
    assert_ne!(new_id, old_id);
    release.notify_one();

    let err = timeout(TEST_TIMEOUT, run).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, OnboardingError::Cancelled));

    let session = m.snapshot().await;
    assert_eq!(session.id(), new_id);
    assert_eq!(session.step(), Step::Identity);
    assert!(session.verdict().is_none());
    assert!(session.product().is_none());
    assert!(session.transitions().is_empty());
    assert_eq!(session.assessment(), &AssessmentStatus::Idle);
}

#[tokio::test]
async fn pipeline_failure_stays_at_assessment_until_retried() {
    let pipeline = RiskPipeline::new(Box::new(ClippedSum), OutcomePolicy::default())
        .with_agent(Arc::new(FlakyAgent {
            calls: AtomicUsize::new(0),
        }));
    let m = manager(pipeline);
    to_documents(&m).await;

    let err = m.advance(statement()).await.unwrap_err();
    match &err {
        OnboardingError::Pipeline(PipelineError::AgentFailed { agent, cause }) => {
            assert_eq!(agent, "flaky");
            assert!(cause.contains("model warming up"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let view = m.view().await;
    assert_eq!(view.step, Step::Assessment);
    assert!(view.verdict.is_none());
    assert!(matches!(
        view.assessment,
        AssessmentStatus::Failed { agent: Some(ref a), .. } if a == "flaky"
    ));

    assert_eq!(m.advance(StepPayload::Assess).await.unwrap(), Step::Verdict);
    let session = m.snapshot().await;
    assert_eq!(session.verdict().map(|v| v.traces().len()), Some(1));
    assert_eq!(session.assessment(), &AssessmentStatus::Complete);
}

#[tokio::test]
async fn identical_inputs_give_identical_verdicts() {
    let mut verdicts = Vec::new();
    for _ in 0..2 {
        let m = manager(standard_pipeline());
        to_documents(&m).await;
        m.advance(statement()).await.unwrap();
        verdicts.push(m.snapshot().await.verdict().cloned().expect("verdict"));
    }
    assert_eq!(verdicts[0].outcome(), verdicts[1].outcome());
    assert_eq!(verdicts[0].score(), verdicts[1].score());
    assert_eq!(verdicts[0].traces(), verdicts[1].traces());
    assert_eq!(verdicts[0].advisor_insight(), verdicts[1].advisor_insight());
}

#[tokio::test]
async fn reset_from_verdict_starts_over() {
    let m = manager(standard_pipeline());
    to_documents(&m).await;
    m.advance(statement()).await.unwrap();
    assert_eq!(m.current_step().await, Step::Verdict);

    m.reset().await;
    let view = m.view().await;
    assert_eq!(view.step, Step::Identity);
    assert!(view.verdict.is_none());
    assert_eq!(view.document_count, 0);
    assert!(!view.identity.verified);
}

#[tokio::test]
async fn verifications_are_serialized() {
    let verifier = GatedVerifier::new();
    let m = manager_verified_by(verifier.clone(), standard_pipeline());

    let first = {
        let m = Arc::clone(&m);
        tokio::spawn(async move { m.verify("012345678901").await })
    };
    timeout(TEST_TIMEOUT, verifier.started.notified()).await.unwrap();

    let second = {
        let m = Arc::clone(&m);
        tokio::spawn(async move { m.verify("0987 6543 2109").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    assert!(!second.is_finished());

    verifier.release.notify_one();
    let name = timeout(TEST_TIMEOUT, first).await.unwrap().unwrap().unwrap();
    assert_eq!(name, "Spoorthy");

    timeout(TEST_TIMEOUT, verifier.started.notified()).await.unwrap();
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    verifier.release.notify_one();
    timeout(TEST_TIMEOUT, second).await.unwrap().unwrap().unwrap();

    let view = m.view().await;
    assert!(view.identity.verified);
    assert_eq!(view.identity.masked_id, "XXXX XXXX 2109");
}

#[tokio::test]
async fn reset_during_verification_discards_the_result() {
    let verifier = GatedVerifier::new();
    let m = manager_verified_by(verifier.clone(), standard_pipeline());

    let pending = {
        let m = Arc::clone(&m);
        tokio::spawn(async move { m.verify("012345678901").await })
    };
    timeout(TEST_TIMEOUT, verifier.started.notified()).await.unwrap();

    let new_id = m.reset().await;
    verifier.release.notify_one();

    let err = timeout(TEST_TIMEOUT, pending).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, OnboardingError::Cancelled));

    let view = m.view().await;
    assert_eq!(view.id, new_id);
    assert_eq!(view.step, Step::Identity);
    assert!(!view.identity.verified);
    assert!(view.identity.display_name.is_none());
}

#[tokio::test]
async fn overflowing_income_fails_the_scoring_agent() {
    let m = manager(standard_pipeline());
    to_documents_with(
        &m,
        IntakeForm::Loan(LoanIntake {
            annual_income: Some(Decimal::MAX),
            requested_amount: Some(dec!(5000000)),
            credit_score: None,
        }),
    )
    .await;

    let err = timeout(TEST_TIMEOUT, m.advance(statement()))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        &err,
        OnboardingError::Pipeline(PipelineError::AgentFailed { agent, .. }) if agent == SCORING_AGENT
    ));

    let view = m.view().await;
    assert_eq!(view.step, Step::Assessment);
    assert!(matches!(
        view.assessment,
        AssessmentStatus::Failed { agent: Some(ref a), .. } if a == SCORING_AGENT
    ));
}

#[tokio::test]
async fn vanishing_height_fails_the_scoring_agent() {
    let m = manager(standard_pipeline());
    to_documents_with(
        &m,
        IntakeForm::Health(HealthIntake {
            height_cm: Some(dec!(0.0000000000000001)),
            weight_kg: Some(dec!(70)),
            smoker: false,
            age_years: None,
        }),
    )
    .await;

    let err = timeout(TEST_TIMEOUT, m.advance(statement()))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), "pipeline");
    assert!(matches!(
        &err,
        OnboardingError::Pipeline(e) if e.agent() == Some(SCORING_AGENT)
    ));
    assert!(matches!(
        m.view().await.assessment,
        AssessmentStatus::Failed { .. }
    ));
}

#[tokio::test]
async fn dropped_caller_does_not_strand_the_run() {
    let (pipeline, started, release) = gated();
    let m = manager(pipeline);
    to_documents(&m).await;

    let caller = {
        let m = Arc::clone(&m);
        tokio::spawn(async move { m.advance(statement()).await })
    };
    timeout(TEST_TIMEOUT, started.notified()).await.unwrap();
    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    // The detached run still owns the transition
    let err = m.advance(StepPayload::Assess).await.unwrap_err();
    assert!(matches!(err, OnboardingError::ConcurrentTransition));
    assert_eq!(m.view().await.assessment, AssessmentStatus::Running);

    release.notify_one();
    timeout(TEST_TIMEOUT, async {
        while m.current_step().await != Step::Verdict {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let session = m.snapshot().await;
    assert_eq!(session.assessment(), &AssessmentStatus::Complete);
    assert_eq!(session.verdict().map(|v| v.score()), Some(70));
}
