//! Identity verification adapter.
//!
//! Wraps the external identity collaborator (Aadhaar e-KYC style lookups)
//! behind a narrow async contract and normalises every response, error and
//! timeout into a `VerificationOutcome`. A timeout is always a failure.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Required length of the raw identity number.
pub const RAW_ID_LEN: usize = 12;

static RAW_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^[0-9]{{{RAW_ID_LEN}}}$")).unwrap());

/// Whether `raw_id` is exactly twelve ASCII digits.
pub fn is_well_formed(raw_id: &str) -> bool {
    RAW_ID.is_match(raw_id)
}

/// Strip the spaces and dashes applicants type between digit groups.
pub fn normalize_raw_id(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Raw response of the identity collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityCheck {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Match confidence, 0..=100. Treated as 100 when a verified response
    /// omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
}

/// External identity collaborator.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Provider name, used in logs and trace narratives.
    fn name(&self) -> &str;

    /// Look up a well-formed twelve digit identity number.
    async fn verify(&self, raw_id: &str) -> Result<IdentityCheck, String>;
}

/// Normalised verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified { display_name: String, confidence: u8 },
    Failed { reason: String },
}

/// Calls the identity collaborator with a caller-configured timeout.
pub struct VerificationAdapter {
    verifier: Arc<dyn IdentityVerifier>,
    timeout: Duration,
}

impl VerificationAdapter {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, timeout: Duration) -> Self {
        Self { verifier, timeout }
    }

    pub async fn verify(&self, raw_id: &str) -> VerificationOutcome {
        let provider = self.verifier.name().to_string();
        let outcome = match tokio::time::timeout(self.timeout, self.verifier.verify(raw_id)).await {
            Err(_) => VerificationOutcome::Failed {
                reason: "timeout".to_string(),
            },
            Ok(Err(e)) => VerificationOutcome::Failed { reason: e },
            Ok(Ok(check)) if check.verified => VerificationOutcome::Verified {
                display_name: check
                    .display_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "Verified applicant".to_string()),
                confidence: check.confidence.unwrap_or(100).min(100),
            },
            Ok(Ok(check)) => VerificationOutcome::Failed {
                reason: check
                    .reason
                    .unwrap_or_else(|| "identity could not be verified".to_string()),
            },
        };

        match &outcome {
            VerificationOutcome::Verified { confidence, .. } => {
                info!(provider = %provider, confidence, "Identity verified");
            }
            VerificationOutcome::Failed { reason } => {
                warn!(provider = %provider, reason = %reason, "Identity verification failed");
            }
        }
        outcome
    }
}

/// Deterministic stand-in for the identity backend.
///
/// Verifies any well-formed number except placeholders made of one repeated
/// digit (`000000000000`).
pub struct DemoVerifier {
    display_name: String,
}

impl DemoVerifier {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for DemoVerifier {
    fn name(&self) -> &str {
        "demo-ekyc"
    }

    async fn verify(&self, raw_id: &str) -> Result<IdentityCheck, String> {
        let first = raw_id.chars().next();
        if raw_id.chars().all(|c| Some(c) == first) {
            return Ok(IdentityCheck {
                verified: false,
                reason: Some("placeholder identity number".to_string()),
                ..Default::default()
            });
        }
        Ok(IdentityCheck {
            verified: true,
            display_name: Some(self.display_name.clone()),
            confidence: Some(100),
            reason: None,
        })
    }
}
