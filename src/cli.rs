//! Terminal walkthrough of the six onboarding steps, read from stdin.
//!
//! Type `reset` at any prompt to start over, `quit` to leave.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::error::OnboardingError;
use crate::onboarding::manager::{OnboardingManager, StepPayload};
use crate::onboarding::model::{
    AssessmentStatus, DocumentRef, HealthIntake, IntakeForm, LoanIntake, Product, SessionView,
};
use crate::onboarding::state::Step;

enum Input {
    Line(String),
    Reset,
    Quit,
}

/// Interactive presentation consumer for local use.
pub struct CliWalkthrough {
    manager: Arc<OnboardingManager>,
}

impl CliWalkthrough {
    pub fn new(manager: Arc<OnboardingManager>) -> Self {
        Self { manager }
    }

    /// Run against the process's stdin until `quit` or EOF.
    pub async fn run(&self) -> std::io::Result<()> {
        self.run_with(BufReader::new(tokio::io::stdin())).await
    }

    /// Run against any line source.
    pub async fn run_with<R: AsyncBufRead + Unpin>(&self, reader: R) -> std::io::Result<()> {
        let mut lines = reader.lines();
        loop {
            let view = self.manager.view().await;
            let keep_going = match view.step {
                Step::Identity => self.identity_step(&mut lines).await?,
                Step::Product => self.product_step(&mut lines).await?,
                Step::Intake => self.intake_step(&view, &mut lines).await?,
                Step::Documents => self.documents_step(&view, &mut lines).await?,
                Step::Assessment => self.assessment_step(&view, &mut lines).await?,
                Step::Verdict => self.verdict_step(&view, &mut lines).await?,
            };
            if !keep_going {
                return Ok(());
            }
        }
    }

    async fn identity_step<R: AsyncBufRead + Unpin>(
        &self,
        lines: &mut Lines<R>,
    ) -> std::io::Result<bool> {
        eprintln!("\n[1/6] Identity");
        let raw_id = match self.read(lines, "Enter your 12-digit Aadhaar number: ").await? {
            Input::Line(s) => s,
            other => return Ok(self.command(other).await),
        };
        eprintln!("⏳ Verifying with identity provider...");
        match self.manager.verify(&raw_id).await {
            Ok(name) => {
                eprintln!("✅ Hi, {name}");
                self.advance(StepPayload::ConfirmIdentity).await;
            }
            Err(e) => report(&e),
        }
        Ok(true)
    }

    async fn product_step<R: AsyncBufRead + Unpin>(
        &self,
        lines: &mut Lines<R>,
    ) -> std::io::Result<bool> {
        eprintln!("\n[2/6] Choose your shield");
        eprintln!("  1) {}", Product::Loan.shield_name());
        eprintln!("  2) {}", Product::Health.shield_name());
        let choice = match self.read(lines, "Choice: ").await? {
            Input::Line(s) => s,
            other => return Ok(self.command(other).await),
        };
        let product = match choice.to_ascii_lowercase().as_str() {
            "1" | "loan" => Product::Loan,
            "2" | "health" => Product::Health,
            _ => {
                eprintln!("❌ Pick 1 or 2");
                return Ok(true);
            }
        };
        self.advance(StepPayload::SelectProduct { product }).await;
        Ok(true)
    }

    async fn intake_step<R: AsyncBufRead + Unpin>(
        &self,
        view: &SessionView,
        lines: &mut Lines<R>,
    ) -> std::io::Result<bool> {
        eprintln!("\n[3/6] Tell us about yourself");
        let intake = match view.product {
            Some(Product::Loan) => {
                let annual_income = match self.number(lines, "Annual income (₹): ").await? {
                    Ok(v) => v,
                    Err(cmd) => return Ok(self.command(cmd).await),
                };
                let requested_amount =
                    match self.number(lines, "Loan amount requested (₹): ").await? {
                        Ok(v) => v,
                        Err(cmd) => return Ok(self.command(cmd).await),
                    };
                let credit_score = match self
                    .optional::<u16, _>(lines, "CIBIL score (blank to skip): ")
                    .await?
                {
                    Ok(v) => v,
                    Err(cmd) => return Ok(self.command(cmd).await),
                };
                IntakeForm::Loan(LoanIntake {
                    annual_income: Some(annual_income),
                    requested_amount: Some(requested_amount),
                    credit_score,
                })
            }
            Some(Product::Health) => {
                let height_cm = match self.number(lines, "Height (cm): ").await? {
                    Ok(v) => v,
                    Err(cmd) => return Ok(self.command(cmd).await),
                };
                let weight_kg = match self.number(lines, "Weight (kg): ").await? {
                    Ok(v) => v,
                    Err(cmd) => return Ok(self.command(cmd).await),
                };
                let smoker = match self.read(lines, "Do you smoke? (y/n): ").await? {
                    Input::Line(s) => matches!(s.to_ascii_lowercase().as_str(), "y" | "yes"),
                    other => return Ok(self.command(other).await),
                };
                let age_years = match self
                    .optional::<u32, _>(lines, "Age in years (blank to skip): ")
                    .await?
                {
                    Ok(v) => v,
                    Err(cmd) => return Ok(self.command(cmd).await),
                };
                IntakeForm::Health(HealthIntake {
                    height_cm: Some(height_cm),
                    weight_kg: Some(weight_kg),
                    smoker,
                    age_years,
                })
            }
            None => {
                eprintln!("❌ No product selected, starting over");
                self.manager.reset().await;
                return Ok(true);
            }
        };
        self.advance(StepPayload::SubmitIntake { intake }).await;
        Ok(true)
    }

    async fn documents_step<R: AsyncBufRead + Unpin>(
        &self,
        view: &SessionView,
        lines: &mut Lines<R>,
    ) -> std::io::Result<bool> {
        let hint = view.product.map(|p| p.document_hint()).unwrap_or("documents");
        eprintln!("\n[4/6] Upload your {hint}");
        let label = match self
            .read(lines, "Document name (blank if already uploaded): ")
            .await?
        {
            Input::Line(s) => s,
            other => return Ok(self.command(other).await),
        };
        let documents = if label.is_empty() {
            Vec::new()
        } else {
            vec![DocumentRef::new(label)]
        };
        eprintln!("⏳ Running multi-agent assessment...");
        self.advance(StepPayload::SubmitDocuments { documents }).await;
        Ok(true)
    }

    async fn assessment_step<R: AsyncBufRead + Unpin>(
        &self,
        view: &SessionView,
        lines: &mut Lines<R>,
    ) -> std::io::Result<bool> {
        eprintln!("\n[5/6] Assessment");
        if let AssessmentStatus::Failed { cause, .. } = &view.assessment {
            eprintln!("   Last run failed: {cause}");
        }
        match self.read(lines, "Press Enter to run the assessment: ").await? {
            Input::Line(_) => {
                eprintln!("⏳ Running multi-agent assessment...");
                self.advance(StepPayload::Assess).await;
                Ok(true)
            }
            other => Ok(self.command(other).await),
        }
    }

    async fn verdict_step<R: AsyncBufRead + Unpin>(
        &self,
        view: &SessionView,
        lines: &mut Lines<R>,
    ) -> std::io::Result<bool> {
        print_verdict(view);
        match self
            .read(lines, "Type 'reset' to start again or 'quit' to exit: ")
            .await?
        {
            Input::Line(_) => Ok(true),
            other => Ok(self.command(other).await),
        }
    }

    async fn advance(&self, payload: StepPayload) {
        match self.manager.advance(payload).await {
            Ok(step) => eprintln!("➡️  Step {} of 6", step.number()),
            Err(e) => report(&e),
        }
    }

    /// Handle `reset`/`quit`. Returns whether to keep going.
    async fn command(&self, input: Input) -> bool {
        match input {
            Input::Reset => {
                self.manager.reset().await;
                eprintln!("🔄 Session reset");
                true
            }
            Input::Quit => false,
            Input::Line(_) => true,
        }
    }

    async fn read<R: AsyncBufRead + Unpin>(
        &self,
        lines: &mut Lines<R>,
        prompt: &str,
    ) -> std::io::Result<Input> {
        eprint!("{prompt}");
        Ok(match lines.next_line().await? {
            None => Input::Quit,
            Some(line) => match line.trim() {
                "quit" | "/quit" | "exit" => Input::Quit,
                "reset" | "restart" => Input::Reset,
                other => Input::Line(other.to_string()),
            },
        })
    }

    /// Keep asking until a number parses. `Err` carries a command typed
    /// instead.
    async fn number<R: AsyncBufRead + Unpin>(
        &self,
        lines: &mut Lines<R>,
        prompt: &str,
    ) -> std::io::Result<Result<Decimal, Input>> {
        loop {
            match self.read(lines, prompt).await? {
                Input::Line(s) => match parse_amount::<Decimal>(&s) {
                    Some(v) => return Ok(Ok(v)),
                    None => eprintln!("❌ '{s}' is not a number"),
                },
                other => return Ok(Err(other)),
            }
        }
    }

    /// Like [`Self::number`] but blank input skips the field.
    async fn optional<T: FromStr, R: AsyncBufRead + Unpin>(
        &self,
        lines: &mut Lines<R>,
        prompt: &str,
    ) -> std::io::Result<Result<Option<T>, Input>> {
        loop {
            match self.read(lines, prompt).await? {
                Input::Line(s) if s.is_empty() => return Ok(Ok(None)),
                Input::Line(s) => match parse_amount::<T>(&s) {
                    Some(v) => return Ok(Ok(Some(v))),
                    None => eprintln!("❌ '{s}' is not a number"),
                },
                other => return Ok(Err(other)),
            }
        }
    }
}

/// Accepts `15,00,000` and `₹1500000` as well as plain digits.
fn parse_amount<T: FromStr>(input: &str) -> Option<T> {
    let cleaned: String = input
        .chars()
        .filter(|c| *c != ',' && *c != '₹' && !c.is_whitespace())
        .collect();
    cleaned.parse().ok()
}

fn report(e: &OnboardingError) {
    match e {
        OnboardingError::Validation { unmet, .. } => eprintln!("❌ {unmet}"),
        OnboardingError::Pipeline(_) => eprintln!("❌ Assessment failed: {e}"),
        _ => eprintln!("❌ {e}"),
    }
}

fn print_verdict(view: &SessionView) {
    let Some(verdict) = &view.verdict else {
        return;
    };
    let shield = view.product.map(|p| p.shield_name()).unwrap_or("Kavach");
    println!("\n[6/6] {shield} verdict");
    match view.product {
        Some(Product::Health) => println!("   Annual premium: {}", verdict.outcome()),
        _ => println!("   Decision: {}", verdict.outcome()),
    }
    println!("   Score: {}/100 ({})", verdict.score(), verdict.rule());
    println!("\n   Why:");
    for trace in verdict.traces() {
        println!("   • {} [{:+}]", trace.agent_name(), trace.score());
        println!("     {}", trace.narrative());
    }
    println!("\n   💡 {}\n", verdict.advisor_insight());
}
