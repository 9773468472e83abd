//! Shared error type used across all Palaver crates.
//!
//! Every remote call and executor invocation classifies its failure into an
//! [`ErrorKind`]. The kind decides retry behavior and what the user sees:
//! `validation` re-prompts, `user_out_of_scope` takes a dedicated flow
//! branch, `transient` is retried, everything else surfaces an apology.

use serde::{Deserialize, Serialize};

/// Failure classification shared by executors and RPC clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User input could not be parsed or is out of range; re-prompt.
    Validation,
    /// The request is fine but outside the serviceable area / catalog.
    UserOutOfScope,
    /// Network timeout, 5xx, connection reset. Safe to retry.
    Transient,
    /// Remote service returned a business-level rejection (4xx).
    Upstream,
    /// Engine bug or broken invariant (invalid state ref, loop detected).
    Internal,
    /// Turn was cancelled by the user; no message emitted.
    Cancelled,
}

impl ErrorKind {
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::UserOutOfScope => "user_out_of_scope",
            ErrorKind::Transient => "transient",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Internal => "internal",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("flow: {0}")]
    Flow(String),

    #[error("timeout calling {service}")]
    Timeout { service: String },

    #[error("service {service}: {message}")]
    Service {
        service: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout { .. } => ErrorKind::Transient,
            Error::Service { kind, .. } => *kind,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_) | Error::Flow(_) => ErrorKind::Internal,
            Error::Io(_) | Error::Json(_) | Error::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }

    /// Shorthand for a service error with an explicit kind.
    pub fn service(service: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Service {
            service: service.into(),
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorKind::Transient.retryable());
        for kind in [
            ErrorKind::Validation,
            ErrorKind::UserOutOfScope,
            ErrorKind::Upstream,
            ErrorKind::Internal,
            ErrorKind::Cancelled,
        ] {
            assert!(!kind.retryable(), "{kind} must not be retryable");
        }
    }

    #[test]
    fn timeout_classifies_transient() {
        let e = Error::Timeout {
            service: "routing".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Transient);
        assert!(e.retryable());
    }

    #[test]
    fn service_error_carries_its_kind() {
        let e = Error::service("order", ErrorKind::Upstream, "payment declined");
        assert_eq!(e.kind(), ErrorKind::Upstream);
        assert!(!e.retryable());
    }
}
