//! The closed result of one probe run.

use std::fmt;

/// Result of a single probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The subject under test behaved correctly.
    Healthy,
    /// The subject under test is broken. `code` is a metrics label and comes
    /// from the probe type's fixed vocabulary; details go in `message`.
    Unhealthy { code: &'static str, message: String },
    /// The probe could not reach a verdict, e.g. its quota is exhausted.
    Indeterminate { cause: String },
}

impl Outcome {
    pub fn unhealthy(code: &'static str, message: impl Into<String>) -> Self {
        debug_assert!(!code.is_empty(), "unhealthy outcomes need a code");
        Outcome::Unhealthy {
            code,
            message: message.into(),
        }
    }

    pub fn indeterminate(cause: impl Into<String>) -> Self {
        Outcome::Indeterminate {
            cause: cause.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Outcome::Healthy)
    }

    /// The failure code, for unhealthy outcomes.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Outcome::Unhealthy { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Bounded label for the `result` metrics dimension.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Healthy => "healthy",
            Outcome::Unhealthy { .. } => "unhealthy",
            Outcome::Indeterminate { .. } => "indeterminate",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Healthy => f.write_str("healthy"),
            Outcome::Unhealthy { code, message } => write!(f, "unhealthy ({code}): {message}"),
            Outcome::Indeterminate { cause } => write!(f, "indeterminate: {cause}"),
        }
    }
}
