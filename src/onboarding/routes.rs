//! REST endpoints for driving and observing the onboarding session.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::error::OnboardingError;

use super::manager::{OnboardingManager, StepPayload};
use super::model::SessionView;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<OnboardingManager>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub raw_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub display_name: String,
    pub session: SessionView,
}

impl IntoResponse for OnboardingError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidTransition { .. } | Self::ConcurrentTransition | Self::Cancelled => {
                StatusCode::CONFLICT
            }
            Self::Pipeline(_) => StatusCode::BAD_GATEWAY,
            Self::VerificationFailed { .. } => StatusCode::FORBIDDEN,
        };
        let agent = match &self {
            Self::Pipeline(e) => e.agent().map(String::from),
            _ => None,
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "agent": agent,
        });
        (status, Json(body)).into_response()
    }
}

/// GET /api/onboarding/session
async fn get_session(State(state): State<OnboardingRouteState>) -> Json<SessionView> {
    Json(state.manager.view().await)
}

/// POST /api/onboarding/verify
async fn verify(
    State(state): State<OnboardingRouteState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, OnboardingError> {
    let display_name = state.manager.verify(&req.raw_id).await?;
    Ok(Json(VerifyResponse {
        display_name,
        session: state.manager.view().await,
    }))
}

/// POST /api/onboarding/advance
///
/// Body is a tagged [`StepPayload`], e.g. `{"action":"select_product","product":"LOAN"}`.
async fn advance(
    State(state): State<OnboardingRouteState>,
    Json(payload): Json<StepPayload>,
) -> Result<Json<SessionView>, OnboardingError> {
    state.manager.advance(payload).await?;
    Ok(Json(state.manager.view().await))
}

/// POST /api/onboarding/reset
async fn reset(State(state): State<OnboardingRouteState>) -> Json<SessionView> {
    state.manager.reset().await;
    Json(state.manager.view().await)
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/session", get(get_session))
        .route("/api/onboarding/verify", post(verify))
        .route("/api/onboarding/advance", post(advance))
        .route("/api/onboarding/reset", post(reset))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
