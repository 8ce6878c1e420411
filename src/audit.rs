//! Audit trail.
//!
//! One record is emitted per authentication transaction and per ticket
//! operation performed through the service facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::authentication::{Authentication, AuthenticationError, FailureKind};
use crate::ticket::TicketId;

/// Outcome of one handler as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditHandlerOutcome {
    pub handler: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl AuditHandlerOutcome {
    /// Outcomes of a successful authentication in execution order.
    pub fn from_authentication(authentication: &Authentication) -> Vec<Self> {
        if !authentication.attempts.is_empty() {
            let mut failures = authentication.failures.iter();
            return authentication
                .attempts
                .iter()
                .map(|attempt| Self {
                    handler: attempt.handler.clone(),
                    success: attempt.success,
                    failure: if attempt.success {
                        None
                    } else {
                        failures.next().map(|f| f.kind)
                    },
                })
                .collect();
        }

        // Recorded without attempts: order across successes and failures is unknown
        let successes = authentication.successful_handlers.iter().map(|h| Self {
            handler: h.clone(),
            success: true,
            failure: None,
        });
        let failures = authentication.failures.iter().map(|f| Self {
            handler: f.handler.clone(),
            success: false,
            failure: Some(f.kind),
        });
        successes.chain(failures).collect()
    }

    pub fn from_error(error: &AuthenticationError) -> Vec<Self> {
        error
            .failures()
            .iter()
            .map(|f| Self {
                handler: f.handler.clone(),
                success: false,
                failure: Some(f.kind),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

/// Audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// What was attempted, e.g. `TICKET_GRANTING_TICKET_CREATED`.
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(default)]
    pub handler_outcomes: Vec<AuditHandlerOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<TicketId>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditRecord {
    pub fn new(timestamp: DateTime<Utc>, action: impl Into<String>, result: AuditResult) -> Self {
        Self {
            timestamp,
            action: action.into(),
            transaction_id: None,
            principal_id: None,
            handler_outcomes: Vec::new(),
            ticket_id: None,
            result,
            reason: None,
        }
    }

    pub fn with_transaction(mut self, id: Uuid) -> Self {
        self.transaction_id = Some(id);
        self
    }

    pub fn with_principal(mut self, id: impl Into<String>) -> Self {
        self.principal_id = Some(id.into());
        self
    }

    pub fn with_outcomes(mut self, outcomes: Vec<AuditHandlerOutcome>) -> Self {
        self.handler_outcomes = outcomes;
        self
    }

    pub fn with_ticket(mut self, id: TicketId) -> Self {
        self.ticket_id = Some(id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Destination for audit records.
pub trait AuditTrail: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Logs each record as JSON under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditTrail;

impl AuditTrail for TracingAuditTrail {
    fn record(&self, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(json) => info!(target: "audit", action = %record.action, record = %json, "Audit record"),
            Err(e) => warn!(target: "audit", error = %e, "Failed to serialize audit record"),
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditTrail {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditTrail for InMemoryAuditTrail {
    fn record(&self, record: &AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::{HandlerAttempt, HandlerFailure, Principal};

    #[test]
    fn test_record_shape() {
        let transaction = Uuid::new_v4();
        let record = AuditRecord::new(Utc::now(), "AUTHENTICATION_FAILED", AuditResult::Failure)
            .with_transaction(transaction)
            .with_outcomes(AuditHandlerOutcome::from_error(&AuthenticationError::Aggregate {
                failures: vec![HandlerFailure::rejected("static-users", "bad password")],
            }));

        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["transactionId"], transaction.to_string());
        assert_eq!(json["result"], "failure");
        assert_eq!(json["handlerOutcomes"][0]["handler"], "static-users");
        assert_eq!(json["handlerOutcomes"][0]["failure"], "credential_rejected");
        assert!(json.get("ticketId").is_none());
        assert!(json.get("principalId").is_none());
    }

    #[test]
    fn test_outcomes_follow_execution_order() {
        let attempt = |handler: &str, success| HandlerAttempt {
            handler: handler.to_string(),
            success,
        };
        let authentication = Authentication {
            authenticated_at: Utc::now(),
            principal: Principal::new("casuser"),
            successful_handlers: vec!["static-users".to_string()],
            failures: vec![
                HandlerFailure::unavailable("ldap", "timeout"),
                HandlerFailure::rejected("api-keys", "unknown key"),
            ],
            attempts: vec![
                attempt("ldap", false),
                attempt("static-users", true),
                attempt("api-keys", false),
            ],
            attributes: Default::default(),
            credentials: vec![],
        };

        let outcomes = AuditHandlerOutcome::from_authentication(&authentication);
        let handlers: Vec<&str> = outcomes.iter().map(|o| o.handler.as_str()).collect();
        assert_eq!(handlers, vec!["ldap", "static-users", "api-keys"]);
        assert_eq!(outcomes[0].failure, Some(FailureKind::HandlerUnavailable));
        assert!(outcomes[1].success);
        assert_eq!(outcomes[2].failure, Some(FailureKind::CredentialRejected));
    }

    #[test]
    fn test_in_memory_trail() {
        let trail = InMemoryAuditTrail::new();
        trail.record(
            &AuditRecord::new(Utc::now(), "TICKET_DESTROYED", AuditResult::Success)
                .with_ticket(TicketId::from("TGT-1-abc")),
        );
        TracingAuditTrail.record(&AuditRecord::new(Utc::now(), "NOOP", AuditResult::Success));

        let records = trail.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ticket_id, Some(TicketId::from("TGT-1-abc")));
    }
}
