use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use kavach::assessment::{GlassBoxModel, RiskPipeline, StaticMarketContext};
use kavach::cli::CliWalkthrough;
use kavach::config::OnboardingConfig;
use kavach::documents::InMemoryDocuments;
use kavach::identity::{DemoVerifier, IdentityVerifier};
use kavach::onboarding::{OnboardingDeps, OnboardingManager, OnboardingRouteState, onboarding_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OnboardingConfig::from_env().context("invalid KAVACH_* configuration")?;

    // Dropping the guard flushes the log file
    let _log_guard = init_tracing(&config);

    eprintln!("🛡️  Kavach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Combination: {:?}", config.combination);
    eprintln!(
        "   Timeouts: verify {}ms, stage {}ms",
        config.verify_timeout.as_millis(),
        config.stage_timeout.as_millis()
    );
    if let Some(dir) = &config.log_dir {
        eprintln!("   Logs: {}", dir.display());
    }

    // ── Collaborators ───────────────────────────────────────────────────
    let verifier = Arc::new(DemoVerifier::new("Spoorthy"));
    let documents = Arc::new(InMemoryDocuments::new());
    let pipeline = RiskPipeline::standard(
        verifier.name(),
        Arc::new(GlassBoxModel::new()),
        Arc::new(StaticMarketContext::new(
            config.market_delta_loan,
            config.market_delta_health,
        )),
        config.combination.build(),
        config.outcome_policy(),
    )
    .with_stage_timeout(config.stage_timeout);
    eprintln!("   Agents: {}", pipeline.agent_names().join(" → "));

    let manager = Arc::new(OnboardingManager::new(OnboardingDeps {
        verifier,
        documents,
        pipeline,
        verify_timeout: config.verify_timeout,
    }));

    // ── Presentation ────────────────────────────────────────────────────
    match config.http_port {
        Some(port) => {
            let app = onboarding_routes(OnboardingRouteState { manager });
            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
                .await
                .with_context(|| format!("failed to bind port {port}"))?;
            eprintln!("   API: http://0.0.0.0:{port}/api/onboarding/session\n");
            tracing::info!(port, "Onboarding API started");
            axum::serve(listener, app).await?;
        }
        None => {
            eprintln!("   Type 'reset' to start over, 'quit' to exit.\n");
            CliWalkthrough::new(manager).run().await?;
        }
    }

    Ok(())
}

/// Console logging, plus a daily rolling file when `KAVACH_LOG_DIR` is set.
fn init_tracing(config: &OnboardingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "kavach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}
