//! Shared types, errors, scenario model, and artifact store for the docflow engine.
//!
//! This crate provides the foundational types used across all other docflow crates:
//! - `DocflowError` — unified error taxonomy
//! - `Scenario` / `Step` — the immutable pipeline definition
//! - `StructuredResult` — validated reply of the reasoning service
//! - `ActionRule` — routing rule configuration
//! - `ArtifactStore` — named string values passed between steps

pub mod action;
pub mod analysis;
pub mod artifacts;
pub mod scenario;

pub use action::{ActionId, ActionRule, Combinator, MetricValueType, RuleMetric, RuleOperator};
pub use analysis::{
    Analysis, DocumentProfile, ExecutionCommand, Finding, ResponseStatus, StructuredResult,
};
pub use artifacts::ArtifactStore;
pub use scenario::{
    generate_check_key, AiStep, BooleanCheck, DocumentMock, Scenario, StandardStep, Step,
};

use serde::{Deserialize, Serialize};

/// Unified error type for all docflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum DocflowError {
    // === Reasoning Service Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Invalid reasoning response: {message}")]
    InvalidResponse { message: String },

    #[error("Reasoning service reported status '{status}'")]
    ServiceReportedFailure { status: String },

    // === Load Errors ===
    #[error("Scenario '{scenario_id}' not found")]
    ScenarioNotFound { scenario_id: String },

    #[error("Scenario '{scenario_id}' is invalid: {message}")]
    ScenarioInvalid {
        scenario_id: String,
        message: String,
    },

    #[error("Knowledge document '{name}' unavailable: {message}")]
    KnowledgeUnavailable { name: String, message: String },

    // === Configuration Errors ===
    #[error("Rule configuration error: {0}")]
    ConfigError(String),

    // === Engine Errors ===
    #[error("Event '{event}' is not valid in state {status}")]
    InvalidTransition { status: RunStatus, event: String },

    #[error("No scenario loaded")]
    NoScenarioLoaded,

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DocflowError {
    /// Returns `true` if a reasoning call failing with this error may be
    /// attempted again. Timeouts are excluded: a slow service only gets slower.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DocflowError::RequestTimeout { .. }
                | DocflowError::ConfigError(_)
                | DocflowError::InvalidTransition { .. }
                | DocflowError::NoScenarioLoaded
        )
    }

    /// Returns `true` for errors raised while loading a scenario or knowledge
    /// document.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            DocflowError::ScenarioNotFound { .. }
                | DocflowError::ScenarioInvalid { .. }
                | DocflowError::KnowledgeUnavailable { .. }
        )
    }
}

/// A convenience alias for `Result<T, DocflowError>`.
pub type Result<T> = std::result::Result<T, DocflowError>;

// ---------------------------------------------------------------------------
// RunStatus — lifecycle state of a pipeline run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Idle,
    Animating,
    WaitingLlm,
    ShowingResult,
    Paused,
    LlmError,
    Completed,
}

impl RunStatus {
    /// `IDLE` and `COMPLETED` only change on an explicit start or reset.
    pub fn is_stable(self) -> bool {
        matches!(self, RunStatus::Idle | RunStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "IDLE",
            RunStatus::Animating => "ANIMATING",
            RunStatus::WaitingLlm => "WAITING_LLM",
            RunStatus::ShowingResult => "SHOWING_RESULT",
            RunStatus::Paused => "PAUSED",
            RunStatus::LlmError => "LLM_ERROR",
            RunStatus::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_provider_error() {
        let err = DocflowError::ProviderError {
            provider: "google".into(),
            status: 500,
            message: "internal server error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider google returned HTTP 500: internal server error"
        );
    }

    #[test]
    fn error_display_timeout() {
        let err = DocflowError::RequestTimeout {
            provider: "google".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.to_string(), "Request to google timed out after 30000ms");
    }

    #[test]
    fn error_display_invalid_transition() {
        let err = DocflowError::InvalidTransition {
            status: RunStatus::Idle,
            event: "acknowledge".into(),
        };
        assert_eq!(
            err.to_string(),
            "Event 'acknowledge' is not valid in state IDLE"
        );
    }

    #[test]
    fn error_display_scenario_invalid() {
        let err = DocflowError::ScenarioInvalid {
            scenario_id: "s1".into(),
            message: "duplicate step_id 'a'".into(),
        };
        assert_eq!(
            err.to_string(),
            "Scenario 's1' is invalid: duplicate step_id 'a'"
        );
    }

    // --- is_retryable ---

    #[test]
    fn timeout_is_not_retryable() {
        let err = DocflowError::RequestTimeout {
            provider: "x".into(),
            timeout_ms: 1,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn network_and_shape_errors_are_retryable() {
        let network = DocflowError::ProviderError {
            provider: "x".into(),
            status: 0,
            message: "connection reset".into(),
        };
        let shape = DocflowError::InvalidResponse {
            message: "missing field".into(),
        };
        let reported = DocflowError::ServiceReportedFailure {
            status: "error".into(),
        };
        assert!(network.is_retryable());
        assert!(shape.is_retryable());
        assert!(reported.is_retryable());
    }

    #[test]
    fn config_error_is_not_retryable() {
        assert!(!DocflowError::ConfigError("bad operator".into()).is_retryable());
    }

    #[test]
    fn load_errors_are_classified() {
        assert!(DocflowError::ScenarioNotFound {
            scenario_id: "x".into()
        }
        .is_load_error());
        assert!(!DocflowError::NoScenarioLoaded.is_load_error());
    }

    // --- From impls ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DocflowError = io_err.into();
        assert!(matches!(err, DocflowError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: DocflowError = json_err.into();
        assert!(matches!(err, DocflowError::Json(_)));
    }

    // --- RunStatus ---

    #[test]
    fn run_status_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::WaitingLlm).unwrap(),
            "\"WAITING_LLM\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::ShowingResult).unwrap(),
            "\"SHOWING_RESULT\""
        );
        let status: RunStatus = serde_json::from_str("\"LLM_ERROR\"").unwrap();
        assert_eq!(status, RunStatus::LlmError);
    }

    #[test]
    fn run_status_display_matches_serde_name() {
        for status in [
            RunStatus::Idle,
            RunStatus::Animating,
            RunStatus::WaitingLlm,
            RunStatus::ShowingResult,
            RunStatus::Paused,
            RunStatus::LlmError,
            RunStatus::Completed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn stable_states() {
        assert!(RunStatus::Idle.is_stable());
        assert!(RunStatus::Completed.is_stable());
        assert!(!RunStatus::Paused.is_stable());
        assert!(!RunStatus::WaitingLlm.is_stable());
    }
}
