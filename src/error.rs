use candid::CandidType;
use serde::{Deserialize, Serialize};

/// Failures surfaced to callers of the invocation engine.
///
/// Validation-stage variants never touch a transaction record. `Broadcast`
/// and `Confirmation` always correspond to a record that ended `Failed`.
#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{parameter}: {reason}")]
    Validation { parameter: String, reason: String },

    #[error("{parameter}: insufficient funds, requested {requested} base units but only {available} available")]
    InsufficientFunds {
        parameter: String,
        requested: String,
        available: String,
    },

    #[error("broadcast failed: {cause}")]
    Broadcast { cause: String },

    #[error("confirmation failed: {cause}")]
    Confirmation { cause: String },

    #[error("scheduling failed: {reason}")]
    Scheduling { reason: String },
}

impl EngineError {
    pub fn validation(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub fn scheduling(reason: impl Into<String>) -> Self {
        Self::Scheduling {
            reason: reason.into(),
        }
    }

    /// True for pre-flight failures, including the underfunded case.
    #[cfg(test)]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InsufficientFunds { .. })
    }

    #[cfg(test)]
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::Validation { parameter, .. } | Self::InsufficientFunds { parameter, .. } => {
                Some(parameter)
            }
            _ => None,
        }
    }
}
