//! Central authentication service.
//!
//! Facade over the authentication engine and the ticket lifecycle: logs users
//! in, issues and validates tickets, and records every operation in the audit
//! trail.

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditHandlerOutcome, AuditRecord, AuditResult, AuditTrail};
use crate::authentication::{
    AttributeReleaseConfig, Attributes, AuthenticationAttributeReleasePolicy,
    AuthenticationError, AuthenticationExecutionPlan, AuthenticationTransaction,
    AuthenticationTransactionManager, CoreAuthenticationConfigurer, PlanBuildError, Principal,
};
use crate::clock::Clock;
use crate::config::TicketAuthorityConfig;
use crate::sso::{RequestContext, SingleSignOnEvaluator, SsoDecision, UnauthorizedRedirectError};
use crate::ticket::{
    InMemoryTicketRegistry, InvalidReason, RedbTicketRegistry, RegistryBackend, RegistryConfig,
    Service, Ticket, TicketCatalog, TicketError, TicketId, TicketKind, TicketLifecycleEngine,
    TicketPayload, TicketRegistry,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Unauthorized(#[from] UnauthorizedRedirectError),

    #[error(transparent)]
    PlanBuild(#[from] PlanBuildError),

    #[error("catalog reload failed")]
    CatalogReload(#[source] anyhow::Error),
}

/// What a service learns when it validates a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub principal: Principal,
    /// Authentication attributes after the release policy.
    pub authentication_attributes: Attributes,
    pub authenticated_at: DateTime<Utc>,
    pub service: Service,
}

pub struct CentralAuthenticationService {
    authentication: AuthenticationTransactionManager,
    tickets: Arc<TicketLifecycleEngine>,
    sso: SingleSignOnEvaluator,
    release_policy: ArcSwap<AuthenticationAttributeReleasePolicy>,
    audit: Arc<dyn AuditTrail>,
    clock: Arc<dyn Clock>,
}

impl CentralAuthenticationService {
    pub fn new(
        authentication: AuthenticationTransactionManager,
        tickets: Arc<TicketLifecycleEngine>,
        sso: SingleSignOnEvaluator,
        release_policy: AuthenticationAttributeReleasePolicy,
        audit: Arc<dyn AuditTrail>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            authentication,
            tickets,
            sso,
            release_policy: ArcSwap::from_pointee(release_policy),
            audit,
            clock,
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(
        config: &TicketAuthorityConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditTrail>,
    ) -> Result<Self> {
        let plan = Arc::new(AuthenticationExecutionPlan::new());
        plan.register(Arc::new(CoreAuthenticationConfigurer::new(
            config.authentication.clone(),
        )))?;
        plan.build()
            .context("Failed to build authentication plan")?;
        let authentication =
            AuthenticationTransactionManager::new(plan, &config.authentication, Arc::clone(&clock));

        let catalog = Arc::new(TicketCatalog::from_config(&config.tickets)?);
        let registry = open_registry(&config.registry)?;
        let tickets = Arc::new(TicketLifecycleEngine::new(
            catalog,
            registry,
            Arc::clone(&clock),
            config.tickets.max_lineage_depth,
        ));

        let sso = SingleSignOnEvaluator::new(
            Arc::clone(&tickets),
            Arc::new(config.delegation.producer()),
            Arc::new(config.delegation.post_processor()),
        );

        Ok(Self::new(
            authentication,
            tickets,
            sso,
            AuthenticationAttributeReleasePolicy::from_config(&config.attribute_release),
            audit,
            clock,
        ))
    }

    pub fn tickets(&self) -> &Arc<TicketLifecycleEngine> {
        &self.tickets
    }

    pub fn authentication(&self) -> &AuthenticationTransactionManager {
        &self.authentication
    }

    /// Authenticate and open an SSO session.
    pub async fn create_ticket_granting_ticket(
        &self,
        transaction: &AuthenticationTransaction,
    ) -> Result<Ticket, ServiceError> {
        let authentication = match self.authentication.authenticate(transaction).await {
            Ok(authentication) => authentication,
            Err(e) => {
                self.audit.record(
                    &AuditRecord::new(self.clock.now(), "AUTHENTICATION_FAILED", AuditResult::Failure)
                        .with_transaction(transaction.id)
                        .with_outcomes(AuditHandlerOutcome::from_error(&e))
                        .with_reason(e.to_string()),
                );
                return Err(e.into());
            }
        };

        let record = AuditRecord::new(
            self.clock.now(),
            "TICKET_GRANTING_TICKET_CREATED",
            AuditResult::Success,
        )
        .with_transaction(transaction.id)
        .with_principal(authentication.principal.id.clone())
        .with_outcomes(AuditHandlerOutcome::from_authentication(&authentication));

        match self.tickets.create_for_kind(
            TicketKind::TicketGrantingTicket,
            None,
            TicketPayload::authentication(authentication),
        ) {
            Ok(ticket) => {
                self.audit.record(&record.with_ticket(ticket.id.clone()));
                Ok(ticket)
            }
            Err(e) => {
                let mut record = record.with_reason(e.to_string());
                record.result = AuditResult::Failure;
                self.audit.record(&record);
                Err(e.into())
            }
        }
    }

    /// Issue a service ticket for `service` from an SSO session.
    pub fn grant_service_ticket(
        &self,
        ticket_granting_ticket: &TicketId,
        service: &Service,
    ) -> Result<Ticket, ServiceError> {
        let result = self
            .require_kind(ticket_granting_ticket, &[TicketKind::TicketGrantingTicket])
            .and_then(|_| {
                self.tickets.create_for_kind(
                    TicketKind::ServiceTicket,
                    Some(ticket_granting_ticket),
                    TicketPayload::service(service.clone()),
                )
            });
        self.audit_ticket("SERVICE_TICKET_CREATED", ticket_granting_ticket, &result);
        Ok(result?)
    }

    /// Validate a service ticket and open a proxy-granting session for the
    /// validating service, parented like the service ticket.
    pub fn grant_proxy_granting_ticket(
        &self,
        service_ticket: &TicketId,
        service: &Service,
    ) -> Result<Ticket, ServiceError> {
        let result = self.tickets.get(service_ticket).and_then(|ticket| {
            let ticket = ticket.ok_or_else(|| TicketError::not_found(service_ticket))?;
            self.tickets.validate_service_ticket(service_ticket, service)?;
            let parent = ticket.parent.ok_or_else(|| {
                TicketError::invalid(service_ticket, InvalidReason::AncestorInvalid(ticket.root))
            })?;
            self.tickets.create_for_kind(
                TicketKind::ProxyGrantingTicket,
                Some(&parent),
                TicketPayload::service(service.clone()),
            )
        });
        self.audit_ticket("PROXY_GRANTING_TICKET_CREATED", service_ticket, &result);
        Ok(result?)
    }

    /// Issue a proxy ticket for `target` from a proxy-granting ticket.
    pub fn grant_proxy_ticket(
        &self,
        proxy_granting_ticket: &TicketId,
        target: &Service,
    ) -> Result<Ticket, ServiceError> {
        let result = self
            .require_kind(proxy_granting_ticket, &[TicketKind::ProxyGrantingTicket])
            .and_then(|_| {
                self.tickets.create_for_kind(
                    TicketKind::ProxyTicket,
                    Some(proxy_granting_ticket),
                    TicketPayload::service(target.clone()),
                )
            });
        self.audit_ticket("PROXY_TICKET_CREATED", proxy_granting_ticket, &result);
        Ok(result?)
    }

    /// Issue a security token from an SSO session.
    pub fn grant_security_token(
        &self,
        ticket_granting_ticket: &TicketId,
        service: &Service,
    ) -> Result<Ticket, ServiceError> {
        let result = self
            .require_kind(ticket_granting_ticket, &[TicketKind::TicketGrantingTicket])
            .and_then(|_| {
                self.tickets.create_for_kind(
                    TicketKind::SecurityToken,
                    Some(ticket_granting_ticket),
                    TicketPayload::service(service.clone()),
                )
            });
        self.audit_ticket("SECURITY_TOKEN_CREATED", ticket_granting_ticket, &result);
        Ok(result?)
    }

    /// Redeem a service or proxy ticket.
    pub fn validate_service_ticket(
        &self,
        service_ticket: &TicketId,
        service: &Service,
    ) -> Result<Assertion, ServiceError> {
        let now = self.clock.now();
        match self.tickets.validate_service_ticket(service_ticket, service) {
            Ok(authentication) => {
                let released = self.release_policy.load().filter(&authentication.attributes);
                self.audit.record(
                    &AuditRecord::new(now, "SERVICE_TICKET_VALIDATED", AuditResult::Success)
                        .with_principal(authentication.principal.id.clone())
                        .with_ticket(service_ticket.clone()),
                );
                Ok(Assertion {
                    principal: authentication.principal,
                    authentication_attributes: released,
                    authenticated_at: authentication.authenticated_at,
                    service: service.clone(),
                })
            }
            Err(e) => {
                self.audit.record(
                    &AuditRecord::new(now, "SERVICE_TICKET_VALIDATED", AuditResult::Failure)
                        .with_ticket(service_ticket.clone())
                        .with_reason(e.to_string()),
                );
                Err(e.into())
            }
        }
    }

    /// End an SSO session; every ticket issued from it is revoked.
    pub fn destroy_ticket_granting_ticket(&self, id: &TicketId) -> Result<(), ServiceError> {
        let principal = self.principal_of(id);
        let result = self.tickets.revoke(id);

        let mut record = AuditRecord::new(
            self.clock.now(),
            "TICKET_GRANTING_TICKET_DESTROYED",
            if result.is_ok() {
                AuditResult::Success
            } else {
                AuditResult::Failure
            },
        )
        .with_ticket(id.clone());
        if let Some(principal) = principal {
            record = record.with_principal(principal);
        }
        if let Err(ref e) = result {
            record = record.with_reason(e.to_string());
        }
        self.audit.record(&record);

        Ok(result?)
    }

    /// Decide how a login request continues.
    pub fn evaluate_single_sign_on(
        &self,
        context: &mut RequestContext,
    ) -> Result<SsoDecision, ServiceError> {
        Ok(self.sso.evaluate(context)?)
    }

    /// Rebuild the authentication plan and the ticket catalog. Either keeps its
    /// previous state if its rebuild fails.
    pub fn reload(&self) -> Result<(), ServiceError> {
        self.authentication.plan().reload()?;
        self.tickets
            .catalog()
            .reload()
            .map_err(ServiceError::CatalogReload)?;
        info!("Central authentication service reloaded");
        Ok(())
    }

    pub fn update_release_policy(&self, config: &AttributeReleaseConfig) {
        self.release_policy
            .store(Arc::new(AuthenticationAttributeReleasePolicy::from_config(config)));
        info!(enabled = config.enabled, "Attribute release policy updated");
    }

    fn require_kind(&self, id: &TicketId, kinds: &[TicketKind]) -> Result<(), TicketError> {
        let ticket = self
            .tickets
            .get(id)?
            .ok_or_else(|| TicketError::not_found(id))?;
        if kinds.contains(&ticket.kind) {
            Ok(())
        } else {
            Err(TicketError::invalid(id, InvalidReason::UnexpectedKind(ticket.kind)))
        }
    }

    fn principal_of(&self, id: &TicketId) -> Option<String> {
        let ticket = self.tickets.get(id).ok()??;
        let authentication = self.tickets.authentication_of(&ticket).ok()??;
        Some(authentication.principal.id)
    }

    fn audit_ticket(&self, action: &str, parent: &TicketId, result: &Result<Ticket, TicketError>) {
        let mut record = match result {
            Ok(ticket) => AuditRecord::new(self.clock.now(), action, AuditResult::Success)
                .with_ticket(ticket.id.clone()),
            Err(e) => {
                warn!(action, parent = %parent, error = %e, "Ticket operation failed");
                AuditRecord::new(self.clock.now(), action, AuditResult::Failure)
                    .with_ticket(parent.clone())
                    .with_reason(e.to_string())
            }
        };
        if let Some(principal) = self.principal_of(parent) {
            record = record.with_principal(principal);
        }
        self.audit.record(&record);
    }
}

/// Open the configured registry backend.
pub fn open_registry(config: &RegistryConfig) -> Result<Arc<dyn TicketRegistry>> {
    match config.backend {
        RegistryBackend::Memory => Ok(Arc::new(InMemoryTicketRegistry::new())),
        RegistryBackend::Redb => {
            let registry = RedbTicketRegistry::open(config.path.clone())?;
            info!(path = %config.path.display(), "Ticket registry opened");
            Ok(Arc::new(registry))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditTrail;
    use crate::authentication::Credential;
    use crate::clock::ManualClock;
    use crate::sso::RecordedResponse;

    fn config() -> TicketAuthorityConfig {
        serde_json::from_str(
            r#"{
                "authentication": {"staticUsers": ["casuser:Mellon"]},
                "attributeRelease": {"onlyRelease": ["credentialType"]},
                "delegation": {
                    "providers": [{"name": "okta", "redirectUrl": "https://okta.example/login", "autoRedirectType": "server"}]
                }
            }"#,
        )
        .unwrap()
    }

    fn service() -> (CentralAuthenticationService, Arc<InMemoryAuditTrail>, Arc<ManualClock>) {
        let audit = Arc::new(InMemoryAuditTrail::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cas = CentralAuthenticationService::from_config(&config(), clock.clone(), audit.clone())
            .unwrap();
        (cas, audit, clock)
    }

    fn login() -> AuthenticationTransaction {
        AuthenticationTransaction::single(Credential::username_password("casuser", "Mellon"))
    }

    #[tokio::test]
    async fn test_login_and_validate() {
        let (cas, audit, _clock) = service();
        let app = Service::new("https://app.example.org");

        let tgt = cas.create_ticket_granting_ticket(&login()).await.unwrap();
        assert_eq!(tgt.kind, TicketKind::TicketGrantingTicket);
        assert!(tgt.id.as_str().starts_with("TGT-"));

        let st = cas.grant_service_ticket(&tgt.id, &app).unwrap();
        let assertion = cas.validate_service_ticket(&st.id, &app).unwrap();
        assert_eq!(assertion.principal.id, "casuser");
        assert_eq!(assertion.authentication_attributes.len(), 1);
        assert!(assertion
            .authentication_attributes
            .contains_key("credentialType"));

        let records = audit.records();
        assert_eq!(records[0].action, "TICKET_GRANTING_TICKET_CREATED");
        assert_eq!(records[0].ticket_id, Some(tgt.id.clone()));
        assert_eq!(records[0].principal_id.as_deref(), Some("casuser"));
        assert!(records[0].transaction_id.is_some());
        assert_eq!(records[0].handler_outcomes.len(), 1);
        assert_eq!(records[1].action, "SERVICE_TICKET_CREATED");
        assert_eq!(records[2].action, "SERVICE_TICKET_VALIDATED");
        assert_eq!(records[2].result, AuditResult::Success);
    }

    #[tokio::test]
    async fn test_failed_login_is_audited() {
        let (cas, audit, _clock) = service();
        let bad = AuthenticationTransaction::single(Credential::username_password("casuser", "wrong"));

        assert!(matches!(
            cas.create_ticket_granting_ticket(&bad).await,
            Err(ServiceError::Authentication(AuthenticationError::Aggregate { .. }))
        ));

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, AuditResult::Failure);
        assert_eq!(records[0].transaction_id, Some(bad.id));
        assert!(records[0].ticket_id.is_none());
        assert!(!records[0].handler_outcomes[0].success);
    }

    #[tokio::test]
    async fn test_logout_revokes_issued_tickets() {
        let (cas, audit, _clock) = service();
        let app = Service::new("https://app.example.org");

        let tgt = cas.create_ticket_granting_ticket(&login()).await.unwrap();
        let st = cas.grant_service_ticket(&tgt.id, &app).unwrap();

        cas.destroy_ticket_granting_ticket(&tgt.id).unwrap();

        assert!(matches!(
            cas.validate_service_ticket(&st.id, &app),
            Err(ServiceError::Ticket(TicketError::InvalidTicket { .. }))
        ));
        assert!(cas.grant_service_ticket(&tgt.id, &app).is_err());

        let destroyed = audit
            .records()
            .into_iter()
            .find(|r| r.action == "TICKET_GRANTING_TICKET_DESTROYED")
            .unwrap();
        assert_eq!(destroyed.principal_id.as_deref(), Some("casuser"));
    }

    #[tokio::test]
    async fn test_proxy_chain() {
        let (cas, _audit, _clock) = service();
        let app = Service::new("https://app.example.org");
        let backend = Service::new("https://backend.example.org");

        let tgt = cas.create_ticket_granting_ticket(&login()).await.unwrap();
        let st = cas.grant_service_ticket(&tgt.id, &app).unwrap();
        let pgt = cas.grant_proxy_granting_ticket(&st.id, &app).unwrap();
        assert_eq!(pgt.parent, Some(tgt.id.clone()));

        let pt = cas.grant_proxy_ticket(&pgt.id, &backend).unwrap();
        let assertion = cas.validate_service_ticket(&pt.id, &backend).unwrap();
        assert_eq!(assertion.principal.id, "casuser");

        // Only proxy-granting tickets issue proxy tickets
        assert!(matches!(
            cas.grant_proxy_ticket(&tgt.id, &backend),
            Err(ServiceError::Ticket(TicketError::InvalidTicket {
                reason: InvalidReason::UnexpectedKind(TicketKind::TicketGrantingTicket),
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_security_token() {
        let (cas, _audit, _clock) = service();
        let tgt = cas.create_ticket_granting_ticket(&login()).await.unwrap();

        let token = cas
            .grant_security_token(&tgt.id, &Service::new("urn:relying-party"))
            .unwrap();
        assert!(token.id.as_str().starts_with("STS-"));
        assert_eq!(token.kind, TicketKind::SecurityToken);
    }

    #[tokio::test]
    async fn test_single_sign_on() {
        let (cas, _audit, clock) = service();
        let tgt = cas.create_ticket_granting_ticket(&login()).await.unwrap();

        let mut ctx = RequestContext::new(Box::new(RecordedResponse::default()))
            .with_ticket_granting_ticket(tgt.id.clone());
        assert_eq!(cas.evaluate_single_sign_on(&mut ctx).unwrap(), SsoDecision::Proceed);

        clock.advance_secs(28800);
        let mut ctx = RequestContext::new(Box::new(RecordedResponse::default()))
            .with_ticket_granting_ticket(tgt.id);
        assert!(matches!(
            cas.evaluate_single_sign_on(&mut ctx).unwrap(),
            SsoDecision::Redirect(provider) if provider.name == "okta"
        ));
    }

    #[tokio::test]
    async fn test_release_policy_update_and_reload() {
        let (cas, _audit, _clock) = service();
        let app = Service::new("https://app.example.org");
        let tgt = cas.create_ticket_granting_ticket(&login()).await.unwrap();

        cas.update_release_policy(&AttributeReleaseConfig {
            enabled: false,
            ..Default::default()
        });
        cas.reload().unwrap();

        let st = cas.grant_service_ticket(&tgt.id, &app).unwrap();
        let assertion = cas.validate_service_ticket(&st.id, &app).unwrap();
        assert!(assertion.authentication_attributes.is_empty());
    }
}
