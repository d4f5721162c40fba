//! Success/fallback tag carried by every degradable stage
//!
//! Fatal failures are the `Err` arm of [`crate::error::Result`]; a stage that
//! can degrade returns `Result<Outcome<T>>` so callers can tell a complete
//! result from a degraded but usable one.

use serde::{Deserialize, Serialize};

/// Result of a stage that may substitute fallback content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome<T> {
    /// The collaborator produced the value
    Success(T),
    /// The value is a substitute
    Fallback { value: T, reason: String },
}

impl<T> Outcome<T> {
    /// Wrap a substitute value
    pub fn fallback(value: T, reason: impl Into<String>) -> Self {
        Outcome::Fallback {
            value,
            reason: reason.into(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Outcome::Fallback { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Success(value) | Outcome::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Success(value) | Outcome::Fallback { value, .. } => value,
        }
    }

    /// Reason of the substitution, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Fallback { reason, .. } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Fallback { value, reason } => Outcome::Fallback {
                value: f(value),
                reason,
            },
        }
    }
}
