use thiserror::Error;

use crate::run::LoopPhase;

/// Main error type for the bocorr system
#[derive(Error, Debug)]
pub enum BoError {
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation `{operation}` is not valid in phase {phase:?}")]
    InvalidState { operation: String, phase: LoopPhase },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoError {
    /// Whether the loop may keep going after this error (the next tick retries).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Evaluation(_) | Self::Numerical(_))
    }
}

/// Failures reported by an objective evaluator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Objective evaluation failed at x = {x}: {message}")]
    Failed { x: f64, message: String },

    #[error("Objective returned a non-finite reading {value} at x = {x}")]
    NonFinite { x: f64, value: f64 },

    #[error("No reading available from {source_name} at x = {x}")]
    NoReading { x: f64, source_name: String },

    #[error("Evaluation timed out after {timeout_ms} ms at x = {x}")]
    Timeout { x: f64, timeout_ms: u64 },
}

/// Result type alias for bocorr operations
pub type BoResult<T> = Result<T, BoError>;

/// Helper trait for converting string errors
pub trait IntoBoError {
    fn into_bo_error(self) -> BoError;
}

impl IntoBoError for String {
    fn into_bo_error(self) -> BoError {
        BoError::Internal(self)
    }
}

impl IntoBoError for &str {
    fn into_bo_error(self) -> BoError {
        BoError::Internal(self.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::errors::BoError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::errors::BoError::Config(format!($($arg)*))
    };
}
