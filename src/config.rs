//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::assessment::combine::{CombinationKind, OutcomePolicy};
use crate::error::ConfigError;

/// Onboarding runtime configuration, built from `KAVACH_*` environment
/// variables.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// How long to wait on the identity collaborator before failing.
    pub verify_timeout: Duration,
    /// Per-agent limit inside the assessment pipeline.
    pub stage_timeout: Duration,
    pub combination: CombinationKind,
    /// Loan approval cut-off on the 0..=100 verdict score.
    pub approval_threshold: u8,
    /// Health premium at a perfect score, in INR.
    pub base_premium: Decimal,
    pub market_delta_loan: i32,
    pub market_delta_health: i32,
    /// Serve REST routes on this port instead of the terminal walkthrough.
    pub http_port: Option<u16>,
    /// Directory for the daily rolling log file.
    pub log_dir: Option<PathBuf>,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            verify_timeout: Duration::from_millis(5_000),
            stage_timeout: Duration::from_millis(10_000),
            combination: CombinationKind::Weighted,
            approval_threshold: 60,
            base_premium: dec!(12000),
            market_delta_loan: -12,
            market_delta_health: -5,
            http_port: None,
            log_dir: None,
        }
    }
}

impl OnboardingConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup. Unset or blank keys keep their
    /// defaults; values that fail to parse are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let verify_timeout = parse::<u64>(&get, "KAVACH_VERIFY_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.verify_timeout);
        let stage_timeout = parse::<u64>(&get, "KAVACH_STAGE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.stage_timeout);
        let combination =
            parse::<CombinationKind>(&get, "KAVACH_COMBINATION")?.unwrap_or(defaults.combination);

        let approval_threshold = parse::<u8>(&get, "KAVACH_APPROVAL_THRESHOLD")?
            .unwrap_or(defaults.approval_threshold);
        if approval_threshold > 100 {
            return Err(ConfigError::InvalidValue {
                key: "KAVACH_APPROVAL_THRESHOLD".into(),
                message: format!("{approval_threshold} is above 100"),
            });
        }

        let base_premium =
            parse::<Decimal>(&get, "KAVACH_BASE_PREMIUM")?.unwrap_or(defaults.base_premium);
        if base_premium.is_sign_negative() {
            return Err(ConfigError::InvalidValue {
                key: "KAVACH_BASE_PREMIUM".into(),
                message: "must not be negative".into(),
            });
        }

        let market_delta_loan = parse::<i32>(&get, "KAVACH_MARKET_DELTA_LOAN")?
            .unwrap_or(defaults.market_delta_loan);
        let market_delta_health = parse::<i32>(&get, "KAVACH_MARKET_DELTA_HEALTH")?
            .unwrap_or(defaults.market_delta_health);
        for (key, delta) in [
            ("KAVACH_MARKET_DELTA_LOAN", market_delta_loan),
            ("KAVACH_MARKET_DELTA_HEALTH", market_delta_health),
        ] {
            if !(-100..=100).contains(&delta) {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("{delta} is outside -100..=100"),
                });
            }
        }

        Ok(Self {
            verify_timeout,
            stage_timeout,
            combination,
            approval_threshold,
            base_premium,
            market_delta_loan,
            market_delta_health,
            http_port: parse::<u16>(&get, "KAVACH_HTTP_PORT")?,
            log_dir: get("KAVACH_LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn outcome_policy(&self) -> OutcomePolicy {
        OutcomePolicy {
            approval_threshold: self.approval_threshold,
            base_premium: self.base_premium,
            ..OutcomePolicy::default()
        }
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}
