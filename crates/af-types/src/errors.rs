use thiserror::Error;

/// Main error type for the autofe tuner
#[derive(Error, Debug)]
pub enum TunerError {
    /// Unsupported operator or malformed search space. Fatal at compile time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// All weights are zero, or a weight is negative / not finite.
    #[error("Degenerate distribution: {message}")]
    DegenerateDistribution { message: String },

    #[error("Insufficient candidates: requested {requested}, only {available} available")]
    InsufficientCandidates { requested: usize, available: usize },

    /// A trial report is missing required fields or carries invalid scores.
    /// Recoverable: the session skips that trial's update.
    #[error("Malformed feedback: {0}")]
    MalformedFeedback(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TunerError {
    /// Whether the session can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedFeedback(_))
    }

    /// Stable machine-readable tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::DegenerateDistribution { .. } => "degenerate_distribution",
            Self::InsufficientCandidates { .. } => "insufficient_candidates",
            Self::MalformedFeedback(_) => "malformed_feedback",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Result type alias for tuner operations
pub type TunerResult<T> = Result<T, TunerError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TunerError::Configuration(format!($($arg)*))
    };
}

/// Macro for creating malformed-feedback errors
#[macro_export]
macro_rules! feedback_error {
    ($($arg:tt)*) => {
        $crate::TunerError::MalformedFeedback(format!($($arg)*))
    };
}

/// Macro for creating degenerate-distribution errors
#[macro_export]
macro_rules! degenerate_error {
    ($($arg:tt)*) => {
        $crate::TunerError::DegenerateDistribution { message: format!($($arg)*) }
    };
}
