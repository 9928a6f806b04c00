use thiserror::Error;

use crate::types::StepNo;

#[derive(Debug, Error)]
pub enum StepGraphError {
    // Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Workflow step type not found by name: {0}")]
    UnknownStepType(String),

    #[error("Workflow type not found by name: {0}")]
    UnknownWorkflowType(String),

    #[error("Step not found by step number: {0}")]
    StepNotFound(StepNo),

    #[error("Workflow not found by id: {0}")]
    WorkflowNotFound(i64),

    #[error("Workflow revision not found by id: {0}")]
    RevisionNotFound(i64),

    #[error("Invalid input values for step {step_no}: {message}")]
    InvalidStepInput { step_no: StepNo, message: String },

    #[error("Workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    // Behavior errors
    #[error("Step {step_no} failed: {message}")]
    StepFailed { step_no: StepNo, message: String },

    #[error("Workflow hook failed: {0}")]
    Hook(String),

    // Limits
    #[error("Maximum nesting depth exceeded ({0})")]
    MaxDepthExceeded(usize),

    #[error("Workflow exceeded max steps ({0})")]
    StepLimitExceeded(usize),

    // Infrastructure
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StepGraphError {
    /// Shorthand for a failure raised by a step behavior.
    pub fn step_failed(step_no: StepNo, message: impl Into<String>) -> Self {
        Self::StepFailed {
            step_no,
            message: message.into(),
        }
    }

    /// Whether this error means the workflow definition (or the registry it
    /// runs against) is unusable, as opposed to a failure while running it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigNotFound(_)
                | Self::UnknownStepType(_)
                | Self::UnknownWorkflowType(_)
                | Self::StepNotFound(_)
                | Self::WorkflowNotFound(_)
                | Self::RevisionNotFound(_)
                | Self::InvalidStepInput { .. }
                | Self::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StepGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(StepGraphError::UnknownStepType("nope".into()).is_configuration());
        assert!(StepGraphError::StepNotFound(7).is_configuration());
        assert!(!StepGraphError::step_failed(3, "boom").is_configuration());
        assert!(!StepGraphError::StepLimitExceeded(10).is_configuration());
    }

    #[test]
    fn test_validation_message_joins_errors() {
        let err = StepGraphError::Validation(vec!["Step 1: bad".into(), "Step 2: worse".into()]);
        assert_eq!(
            err.to_string(),
            "Workflow validation failed: Step 1: bad; Step 2: worse"
        );
    }
}
