//! Kavach — onboarding and underwriting workflow core.

pub mod assessment;
pub mod cli;
pub mod config;
pub mod documents;
pub mod error;
pub mod identity;
pub mod onboarding;
