//! Single sign-on session evaluation and delegated provider selection.

use http::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::context::RequestContext;
use super::provider::{
    AutoRedirectType, DelegatedProvider, DelegatedProviderPostProcessor, DelegatedProviderProducer,
};
use crate::authentication::Credential;
use crate::ticket::{TicketKind, TicketLifecycleEngine};

/// How the login flow continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsoDecision {
    /// A valid SSO session exists.
    Proceed,
    /// The response now redirects to this provider.
    Redirect(DelegatedProvider),
    /// The user has to authenticate; these providers may be offered.
    Reauthenticate { providers: Vec<DelegatedProvider> },
}

#[derive(Debug, Error)]
pub enum UnauthorizedRedirectError {
    #[error("authentication is not authorized: response status {0}")]
    Status(StatusCode),

    #[error("redirect to provider {provider} failed")]
    RedirectFailed {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
}

pub struct SingleSignOnEvaluator {
    engine: Arc<TicketLifecycleEngine>,
    producer: Arc<dyn DelegatedProviderProducer>,
    post_processor: Arc<dyn DelegatedProviderPostProcessor>,
}

impl SingleSignOnEvaluator {
    pub fn new(
        engine: Arc<TicketLifecycleEngine>,
        producer: Arc<dyn DelegatedProviderProducer>,
        post_processor: Arc<dyn DelegatedProviderPostProcessor>,
    ) -> Self {
        Self {
            engine,
            producer,
            post_processor,
        }
    }

    /// True iff the context carries a ticket-granting ticket that can still be
    /// used. Any failure counts as "no session".
    pub fn has_valid_session(&self, context: &RequestContext) -> bool {
        let Some(ref id) = context.ticket_granting_ticket else {
            return false;
        };

        match self.engine.get(id) {
            Ok(Some(ticket)) if ticket.kind == TicketKind::TicketGrantingTicket => {}
            Ok(_) => {
                debug!(ticket_id = %id, "No ticket-granting ticket for reference");
                return false;
            }
            Err(e) => {
                warn!(ticket_id = %id, error = %e, "Failed to look up ticket-granting ticket");
                return false;
            }
        }

        match self.engine.use_ticket(id) {
            Ok(_) => true,
            Err(e) => {
                debug!(ticket_id = %id, error = %e, "SSO session is no longer valid");
                false
            }
        }
    }

    /// Produced providers after post-processing.
    pub fn select_providers(&self, context: &RequestContext) -> Vec<DelegatedProvider> {
        let mut providers = self.producer.produce(context);
        self.post_processor.process(context, &mut providers);
        providers
    }

    /// Decide how the login flow continues.
    ///
    /// The response must be 2xx before any redirect is attempted, and 3xx once
    /// a server-side redirect has been sent; anything else is unauthorized.
    pub fn evaluate(
        &self,
        context: &mut RequestContext,
    ) -> Result<SsoDecision, UnauthorizedRedirectError> {
        let mut providers = self.producer.produce(context);
        trace!(
            providers = ?providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "Delegated providers produced"
        );

        context.credential = Some(Credential::Placeholder);

        let status = context.response().status();
        if !status.is_success() {
            warn!(status = %status, "Response not successful before delegated redirect");
            return Err(UnauthorizedRedirectError::Status(status));
        }

        self.post_processor.process(context, &mut providers);

        if self.has_valid_session(context) {
            debug!("Valid SSO session, proceeding");
            return Ok(SsoDecision::Proceed);
        }

        // Later server providers are ignored
        let auto = providers
            .iter()
            .find(|p| p.auto_redirect_type == AutoRedirectType::Server)
            .cloned();
        let Some(provider) = auto else {
            return Ok(SsoDecision::Reauthenticate { providers });
        };

        info!(provider = %provider.name, url = %provider.redirect_url, "Redirecting to delegated provider");
        context
            .response_mut()
            .send_redirect(&provider.redirect_url)
            .map_err(|source| UnauthorizedRedirectError::RedirectFailed {
                provider: provider.name.clone(),
                source,
            })?;

        let status = context.response().status();
        if !status.is_redirection() {
            warn!(provider = %provider.name, status = %status, "Delegated redirect was not sent");
            return Err(UnauthorizedRedirectError::Status(status));
        }

        Ok(SsoDecision::Redirect(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sso::context::{ExternalResponse, RecordedResponse};
    use crate::sso::provider::{AllowedProvidersPostProcessor, StaticProviderProducer};
    use crate::ticket::{
        InMemoryTicketRegistry, Service, TicketCatalog, TicketId, TicketPayload, TicketsConfig,
    };
    use anyhow::Result;
    use chrono::Utc;
    use std::collections::HashMap;

    fn engine() -> (Arc<TicketLifecycleEngine>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = TicketLifecycleEngine::new(
            Arc::new(TicketCatalog::from_config(&TicketsConfig::default()).unwrap()),
            Arc::new(InMemoryTicketRegistry::new()),
            clock.clone(),
            4,
        );
        (Arc::new(engine), clock)
    }

    fn evaluator(
        engine: Arc<TicketLifecycleEngine>,
        providers: Vec<DelegatedProvider>,
    ) -> SingleSignOnEvaluator {
        SingleSignOnEvaluator::new(
            engine,
            Arc::new(StaticProviderProducer::new(providers)),
            Arc::new(AllowedProvidersPostProcessor::default()),
        )
    }

    fn manual(name: &str) -> DelegatedProvider {
        DelegatedProvider::new(name, format!("https://{}.example/login", name), AutoRedirectType::None)
    }

    fn server(name: &str) -> DelegatedProvider {
        DelegatedProvider::new(name, format!("https://{}.example/login", name), AutoRedirectType::Server)
    }

    fn context() -> RequestContext {
        RequestContext::new(Box::new(RecordedResponse::default()))
    }

    #[test]
    fn test_redirects_to_first_server_provider() {
        let (engine, _clock) = engine();
        let evaluator = evaluator(engine, vec![manual("a"), server("b"), server("c")]);

        let mut ctx = context();
        let decision = evaluator.evaluate(&mut ctx).unwrap();

        assert_eq!(decision, SsoDecision::Redirect(server("b")));
        assert_eq!(ctx.response().status(), StatusCode::FOUND);
        assert!(matches!(ctx.credential, Some(Credential::Placeholder)));
    }

    #[test]
    fn test_server_provider_before_manual_provider() {
        let (engine, _clock) = engine();
        let evaluator = evaluator(engine, vec![server("cas"), manual("github")]);

        let mut ctx = context();
        let decision = evaluator.evaluate(&mut ctx).unwrap();

        assert_eq!(decision, SsoDecision::Redirect(server("cas")));
        assert_ne!(decision, SsoDecision::Redirect(manual("github")));
        assert_eq!(ctx.response().status(), StatusCode::FOUND);
    }

    #[test]
    fn test_no_server_provider_reauthenticates() {
        let (engine, _clock) = engine();
        let evaluator = evaluator(engine, vec![manual("a"), manual("b")]);

        let mut ctx = context();
        let decision = evaluator.evaluate(&mut ctx).unwrap();

        assert_eq!(
            decision,
            SsoDecision::Reauthenticate {
                providers: vec![manual("a"), manual("b")]
            }
        );
        assert_eq!(ctx.response().status(), StatusCode::OK);
    }

    #[test]
    fn test_valid_session_proceeds() {
        let (engine, _clock) = engine();
        let tgt = engine
            .create_for_kind(TicketKind::TicketGrantingTicket, None, TicketPayload::empty())
            .unwrap();
        let evaluator = evaluator(Arc::clone(&engine), vec![server("b")]);

        let mut ctx = context().with_ticket_granting_ticket(tgt.id.clone());
        assert_eq!(evaluator.evaluate(&mut ctx).unwrap(), SsoDecision::Proceed);
        assert_eq!(ctx.response().status(), StatusCode::OK);
        assert_eq!(engine.get(&tgt.id).unwrap().unwrap().use_count, 1);
    }

    #[test]
    fn test_expired_session_falls_through() {
        let (engine, clock) = engine();
        let tgt = engine
            .create_for_kind(TicketKind::TicketGrantingTicket, None, TicketPayload::empty())
            .unwrap();
        let evaluator = evaluator(Arc::clone(&engine), vec![server("b")]);

        clock.advance_secs(28800);
        let ctx = context().with_ticket_granting_ticket(tgt.id.clone());
        assert!(!evaluator.has_valid_session(&ctx));

        let mut ctx = context().with_ticket_granting_ticket(tgt.id);
        assert_eq!(
            evaluator.evaluate(&mut ctx).unwrap(),
            SsoDecision::Redirect(server("b"))
        );
    }

    #[test]
    fn test_session_requires_granting_ticket() {
        let (engine, _clock) = engine();
        let tgt = engine
            .create_for_kind(TicketKind::TicketGrantingTicket, None, TicketPayload::empty())
            .unwrap();
        let st = engine
            .create_for_kind(TicketKind::ServiceTicket, Some(&tgt.id), TicketPayload::empty())
            .unwrap();
        let evaluator = evaluator(engine, vec![]);

        assert!(!evaluator.has_valid_session(&context()));
        assert!(!evaluator.has_valid_session(&context().with_ticket_granting_ticket(st.id)));
        assert!(!evaluator
            .has_valid_session(&context().with_ticket_granting_ticket(TicketId::from("TGT-9-x"))));
        assert!(evaluator.has_valid_session(&context().with_ticket_granting_ticket(tgt.id)));
    }

    #[test]
    fn test_non_success_response_is_unauthorized() {
        let (engine, _clock) = engine();
        let evaluator = evaluator(engine, vec![server("b")]);

        let mut ctx = RequestContext::new(Box::new(RecordedResponse::new(StatusCode::FORBIDDEN)));
        assert!(matches!(
            evaluator.evaluate(&mut ctx),
            Err(UnauthorizedRedirectError::Status(StatusCode::FORBIDDEN))
        ));
        assert!(matches!(ctx.credential, Some(Credential::Placeholder)));
    }

    struct SwallowingResponse;

    impl ExternalResponse for SwallowingResponse {
        fn status(&self) -> StatusCode {
            StatusCode::OK
        }

        fn send_redirect(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_redirect_not_applied_is_unauthorized() {
        let (engine, _clock) = engine();
        let evaluator = evaluator(engine, vec![server("b")]);

        let mut ctx = RequestContext::new(Box::new(SwallowingResponse));
        assert!(matches!(
            evaluator.evaluate(&mut ctx),
            Err(UnauthorizedRedirectError::Status(StatusCode::OK))
        ));

        let mut committed = RecordedResponse::default();
        committed.commit();
        let mut ctx = RequestContext::new(Box::new(committed));
        assert!(matches!(
            evaluator.evaluate(&mut ctx),
            Err(UnauthorizedRedirectError::RedirectFailed { .. })
        ));
    }

    #[test]
    fn test_post_processor_filters_before_selection() {
        let (engine, _clock) = engine();
        let evaluator = SingleSignOnEvaluator::new(
            engine,
            Arc::new(StaticProviderProducer::new(vec![server("b"), server("c")])),
            Arc::new(AllowedProvidersPostProcessor::new(HashMap::from([(
                "https://app.example.org".to_string(),
                vec!["c".to_string()],
            )]))),
        );

        let mut ctx = context().with_service(Service::new("https://app.example.org"));
        assert_eq!(
            evaluator.select_providers(&ctx),
            vec![server("c")]
        );
        assert_eq!(
            evaluator.evaluate(&mut ctx).unwrap(),
            SsoDecision::Redirect(server("c"))
        );
    }
}
