//! Session token errors

use thiserror::Error;

/// Errors produced while parsing or merging session tokens
///
/// Callers treat a parse failure as "no usable token": the request still goes
/// out, just without a client-enforced consistency guarantee.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionTokenError {
    /// The input does not match the session token grammar
    #[error("Invalid session token '{token}': {reason}")]
    Parse { token: String, reason: String },

    /// The two tokens cannot be merged
    #[error("Session tokens '{left}' and '{right}' cannot be merged: {reason}")]
    TokenIncompatible {
        left: String,
        right: String,
        reason: String,
    },
}

impl SessionTokenError {
    pub(crate) fn parse(token: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            token: token.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn incompatible(
        left: impl ToString,
        right: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::TokenIncompatible {
            left: left.to_string(),
            right: right.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for session token operations
pub type Result<T> = std::result::Result<T, SessionTokenError>;
