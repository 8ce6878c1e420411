//! Authentication error kinds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single handler did not produce a usable principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler rejected the credential.
    CredentialRejected,
    /// The handler could not be reached or failed internally.
    HandlerUnavailable,
    /// The handler accepted the credential but no principal could be built.
    PrincipalResolution,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::CredentialRejected => write!(f, "credential_rejected"),
            FailureKind::HandlerUnavailable => write!(f, "handler_unavailable"),
            FailureKind::PrincipalResolution => write!(f, "principal_resolution"),
        }
    }
}

/// Failure of one handler on one credential.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{handler}: {kind}: {message}")]
pub struct HandlerFailure {
    pub handler: String,
    pub kind: FailureKind,
    pub message: String,
}

impl HandlerFailure {
    pub fn rejected(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            kind: FailureKind::CredentialRejected,
            message: message.into(),
        }
    }

    pub fn unavailable(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            kind: FailureKind::HandlerUnavailable,
            message: message.into(),
        }
    }

    pub fn unresolved(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            kind: FailureKind::PrincipalResolution,
            message: message.into(),
        }
    }
}

/// Principal resolver failure.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ResolutionError(pub String);

/// Outcome of a failed authentication transaction.
#[derive(Debug, Clone, Error)]
pub enum AuthenticationError {
    #[error("transaction contains no credentials")]
    EmptyTransaction,

    #[error("principal could not be resolved by {}", .failure.handler)]
    PrincipalResolution { failure: HandlerFailure },

    #[error("authentication failed: {} handler failure(s)", .failures.len())]
    Aggregate { failures: Vec<HandlerFailure> },
}

impl AuthenticationError {
    /// Every individual handler failure carried by this error.
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            AuthenticationError::EmptyTransaction => &[],
            AuthenticationError::PrincipalResolution { failure } => std::slice::from_ref(failure),
            AuthenticationError::Aggregate { failures } => failures,
        }
    }

    /// True when every failure is of the given kind.
    pub fn all_of_kind(&self, kind: FailureKind) -> bool {
        let failures = self.failures();
        !failures.is_empty() && failures.iter().all(|f| f.kind == kind)
    }
}

/// Building the execution plan failed; the previous plan stays active.
#[derive(Debug, Error)]
#[error("configurer '{configurer}' failed to configure the authentication plan")]
pub struct PlanBuildError {
    pub configurer: String,
    #[source]
    pub source: anyhow::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_kind_inspection() {
        let err = AuthenticationError::Aggregate {
            failures: vec![
                HandlerFailure::rejected("static", "bad password"),
                HandlerFailure::rejected("ldap", "bad password"),
            ],
        };
        assert_eq!(err.failures().len(), 2);
        assert!(err.all_of_kind(FailureKind::CredentialRejected));
        assert!(!err.all_of_kind(FailureKind::HandlerUnavailable));
        assert!(err.to_string().contains("2 handler failure(s)"));
    }
}
