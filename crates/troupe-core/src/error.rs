//! Core error type for the Troupe orchestration domain.
//!
//! `CoreError` is used throughout the crate (stores, planning, execution).
//! `StepValidation`, `Provider`, and `Timeout` are transient step faults
//! handled by the retry/fallback controller; everything else propagates to
//! the coordinator.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("No suitable worker for capabilities [{required}]")]
    NoSuitableWorker { required: String },

    #[error("Step output failed validation: {}", failures.join("; "))]
    StepValidation { failures: Vec<String> },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Step '{step_id}' timed out after {secs}s")]
    Timeout { step_id: String, secs: u64 },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    /// Whether the retry/fallback controller may recover from this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::StepValidation { .. } | CoreError::Provider(_) | CoreError::Timeout { .. }
        )
    }
}
