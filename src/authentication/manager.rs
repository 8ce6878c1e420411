//! Authentication transaction manager.
//!
//! Every (credential, handler) pair is dispatched as its own tokio task. The
//! manager waits for all of them before aggregating, so a slow handler delays the
//! whole transaction. Dropping the future returned by
//! [`AuthenticationTransactionManager::authenticate`] abandons the transaction;
//! tasks already spawned still run to completion and their results are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{AuthenticationConfig, PrincipalMergePolicy};
use super::credential::{Attributes, Credential, CredentialMetadata, Principal};
use super::error::{AuthenticationError, FailureKind, HandlerFailure};
use super::handler::HandlerError;
use super::plan::{AuthenticationExecutionPlan, AuthenticationPlan, PlanEntry};
use crate::clock::Clock;
use crate::ticket::Service;

/// One or more credentials submitted together.
#[derive(Debug, Clone)]
pub struct AuthenticationTransaction {
    pub id: Uuid,
    pub credentials: Vec<Credential>,
    pub service: Option<Service>,
}

impl AuthenticationTransaction {
    pub fn of(credentials: Vec<Credential>) -> Self {
        Self {
            id: Uuid::new_v4(),
            credentials,
            service: None,
        }
    }

    pub fn single(credential: Credential) -> Self {
        Self::of(vec![credential])
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.service = Some(service);
        self
    }
}

/// Result of one handler on one credential.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Success { handler: String, principal: Principal },
    Failure(HandlerFailure),
}

impl HandlerOutcome {
    pub fn handler(&self) -> &str {
        match self {
            HandlerOutcome::Success { handler, .. } => handler,
            HandlerOutcome::Failure(failure) => &failure.handler,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Success { .. })
    }
}

/// One dispatched (handler, credential) unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerAttempt {
    pub handler: String,
    pub success: bool,
}

impl From<&HandlerOutcome> for HandlerAttempt {
    fn from(outcome: &HandlerOutcome) -> Self {
        Self {
            handler: outcome.handler().to_string(),
            success: outcome.is_success(),
        }
    }
}

/// Aggregate of a successful transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    pub authenticated_at: DateTime<Utc>,
    pub principal: Principal,
    /// Successful handler names in execution order.
    pub successful_handlers: Vec<String>,
    /// Failures in execution order.
    pub failures: Vec<HandlerFailure>,
    /// Every attempted unit in execution order, successes and failures interleaved.
    #[serde(default)]
    pub attempts: Vec<HandlerAttempt>,
    /// Authentication-level attributes added by metadata populators.
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub credentials: Vec<CredentialMetadata>,
}

impl Authentication {
    /// Append a value to an authentication attribute, skipping duplicates.
    pub fn add_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let values = self.attributes.entry(name.to_string()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }
}

/// Runs transactions through the active execution plan.
pub struct AuthenticationTransactionManager {
    plan: Arc<AuthenticationExecutionPlan>,
    principal_resolution_failure_fatal: bool,
    merge_policy: PrincipalMergePolicy,
    clock: Arc<dyn Clock>,
}

impl AuthenticationTransactionManager {
    pub fn new(
        plan: Arc<AuthenticationExecutionPlan>,
        config: &AuthenticationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            plan,
            principal_resolution_failure_fatal: config.principal_resolution_failure_fatal,
            merge_policy: config.merge_policy,
            clock,
        }
    }

    pub fn plan(&self) -> &Arc<AuthenticationExecutionPlan> {
        &self.plan
    }

    /// Authenticate every credential in the transaction.
    pub async fn authenticate(
        &self,
        transaction: &AuthenticationTransaction,
    ) -> Result<Authentication, AuthenticationError> {
        if transaction.credentials.is_empty() {
            return Err(AuthenticationError::EmptyTransaction);
        }

        // One snapshot for the whole transaction.
        let plan = self.plan.active();

        let mut dispatched = Vec::new();
        for credential in &transaction.credentials {
            for entry in plan.entries_for(credential) {
                let handler = entry.handler.name().to_string();
                let entry = entry.clone();
                let credential = credential.clone();
                debug!(
                    transaction = %transaction.id,
                    handler = %handler,
                    credential = %credential.id(),
                    "Dispatching authentication handler"
                );
                dispatched.push((handler, tokio::spawn(execute(entry, credential))));
            }
        }

        let mut outcomes = Vec::with_capacity(dispatched.len());
        for (handler, task) in dispatched {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => HandlerOutcome::Failure(HandlerFailure::unavailable(
                    handler,
                    format!("Handler task failed: {}", e),
                )),
            };
            outcomes.push(outcome);
        }

        self.aggregate(transaction, &plan, outcomes)
    }

    fn aggregate(
        &self,
        transaction: &AuthenticationTransaction,
        plan: &AuthenticationPlan,
        outcomes: Vec<HandlerOutcome>,
    ) -> Result<Authentication, AuthenticationError> {
        let attempts: Vec<HandlerAttempt> = outcomes.iter().map(HandlerAttempt::from).collect();
        let mut successes: Vec<(String, Principal)> = Vec::new();
        let mut failures: Vec<HandlerFailure> = Vec::new();
        for outcome in outcomes {
            match outcome {
                HandlerOutcome::Success { handler, principal } => successes.push((handler, principal)),
                HandlerOutcome::Failure(failure) => failures.push(failure),
            }
        }

        if self.principal_resolution_failure_fatal {
            if let Some(failure) = failures
                .iter()
                .find(|f| f.kind == FailureKind::PrincipalResolution)
            {
                warn!(
                    transaction = %transaction.id,
                    handler = %failure.handler,
                    "Principal resolution failure is fatal, aborting transaction"
                );
                return Err(AuthenticationError::PrincipalResolution {
                    failure: failure.clone(),
                });
            }
        }

        let mut successes = successes.into_iter();
        let Some((first_handler, mut principal)) = successes.next() else {
            warn!(
                transaction = %transaction.id,
                failures = failures.len(),
                "Authentication failed, no handler succeeded"
            );
            return Err(AuthenticationError::Aggregate { failures });
        };

        let mut successful_handlers = vec![first_handler];
        for (handler, other) in successes {
            if self.merge_policy == PrincipalMergePolicy::Union {
                principal.merge_missing(&other.attributes);
            }
            successful_handlers.push(handler);
        }

        let mut authentication = Authentication {
            authenticated_at: self.clock.now(),
            principal,
            successful_handlers,
            failures,
            attempts,
            attributes: Attributes::new(),
            credentials: transaction
                .credentials
                .iter()
                .map(CredentialMetadata::from)
                .collect(),
        };

        for populator in plan.populators() {
            populator.populate(&mut authentication, transaction);
        }

        info!(
            transaction = %transaction.id,
            principal = %authentication.principal.id,
            handlers = ?authentication.successful_handlers,
            "Authentication successful"
        );
        Ok(authentication)
    }
}

async fn execute(entry: PlanEntry, credential: Credential) -> HandlerOutcome {
    let handler = entry.handler.name().to_string();
    match entry.handler.authenticate(&credential).await {
        Ok(principal) => match entry.resolver.resolve(&credential, principal) {
            Ok(principal) => HandlerOutcome::Success { handler, principal },
            Err(e) => {
                debug!(handler = %handler, resolver = entry.resolver.name(), error = %e, "Principal resolution failed");
                HandlerOutcome::Failure(HandlerFailure::unresolved(handler, e.0))
            }
        },
        Err(HandlerError::Rejected(message)) => {
            debug!(handler = %handler, reason = %message, "Credential rejected");
            HandlerOutcome::Failure(HandlerFailure::rejected(handler, message))
        }
        Err(HandlerError::Unavailable(message)) => {
            warn!(handler = %handler, reason = %message, "Authentication handler unavailable");
            HandlerOutcome::Failure(HandlerFailure::unavailable(handler, message))
        }
    }
}

/// Combines authentications from a multi-step login into one.
#[derive(Debug, Default)]
pub struct AuthenticationResultBuilder {
    authentications: Vec<Authentication>,
}

impl AuthenticationResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, authentication: Authentication) -> &mut Self {
        self.authentications.push(authentication);
        self
    }

    pub fn initial_authentication(&self) -> Option<&Authentication> {
        self.authentications.first()
    }

    pub fn is_empty(&self) -> bool {
        self.authentications.is_empty()
    }

    /// Principal of the first step; everything else merged in step order.
    pub fn build(self) -> Option<Authentication> {
        let mut steps = self.authentications.into_iter();
        let mut combined = steps.next()?;

        for step in steps {
            combined.principal.merge_missing(&step.principal.attributes);
            for handler in step.successful_handlers {
                if !combined.successful_handlers.contains(&handler) {
                    combined.successful_handlers.push(handler);
                }
            }
            combined.failures.extend(step.failures);
            combined.attempts.extend(step.attempts);
            for (name, values) in step.attributes {
                for value in values {
                    combined.add_attribute(&name, value);
                }
            }
            combined.credentials.extend(step.credentials);
            combined.authenticated_at = combined.authenticated_at.max(step.authenticated_at);
        }

        Some(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::error::ResolutionError;
    use crate::authentication::handler::{AuthenticationHandler, PrincipalResolver};
    use crate::authentication::plan::{AuthenticationPlanConfigurer, PlanBuilder};
    use crate::clock::SystemClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Test handler with a fixed result.
    struct FixedHandler {
        name: &'static str,
        result: Result<Principal, HandlerError>,
        delay_ms: u64,
        completed: Option<Arc<AtomicBool>>,
    }

    impl FixedHandler {
        fn success(name: &'static str, principal: Principal) -> Self {
            Self {
                name,
                result: Ok(principal),
                delay_ms: 0,
                completed: None,
            }
        }

        fn failure(name: &'static str, error: HandlerError) -> Self {
            Self {
                name,
                result: Err(error),
                delay_ms: 0,
                completed: None,
            }
        }
    }

    #[async_trait]
    impl AuthenticationHandler for FixedHandler {
        fn name(&self) -> &str {
            self.name
        }
        fn supports(&self, credential: &Credential) -> bool {
            matches!(credential, Credential::UsernamePassword { .. })
        }
        async fn authenticate(&self, _credential: &Credential) -> Result<Principal, HandlerError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if let Some(ref flag) = self.completed {
                flag.store(true, Ordering::SeqCst);
            }
            self.result.clone()
        }
    }

    struct FailingResolver;

    impl PrincipalResolver for FailingResolver {
        fn name(&self) -> &str {
            "failing"
        }
        fn resolve(&self, _c: &Credential, _p: Principal) -> Result<Principal, ResolutionError> {
            Err(ResolutionError("directory offline".to_string()))
        }
    }

    type Entry = (Arc<dyn AuthenticationHandler>, Option<Arc<dyn PrincipalResolver>>);

    struct Entries(Vec<Entry>);

    impl AuthenticationPlanConfigurer for Entries {
        fn name(&self) -> &str {
            "test-entries"
        }
        fn configure(&self, plan: &mut PlanBuilder) -> anyhow::Result<()> {
            for (handler, resolver) in &self.0 {
                match resolver {
                    Some(r) => plan.register_handler_with_resolver(handler.clone(), r.clone())?,
                    None => plan.register_handler(handler.clone())?,
                }
            }
            Ok(())
        }
    }

    fn manager_with(
        entries: Vec<Entry>,
        config: AuthenticationConfig,
    ) -> AuthenticationTransactionManager {
        let plan = Arc::new(AuthenticationExecutionPlan::new());
        plan.register(Arc::new(Entries(entries))).unwrap();
        plan.build().unwrap();
        AuthenticationTransactionManager::new(plan, &config, Arc::new(SystemClock))
    }

    fn handler(h: FixedHandler) -> Entry {
        let handler: Arc<dyn AuthenticationHandler> = Arc::new(h);
        (handler, None)
    }

    fn unresolvable(h: FixedHandler) -> Entry {
        let handler: Arc<dyn AuthenticationHandler> = Arc::new(h);
        let resolver: Arc<dyn PrincipalResolver> = Arc::new(FailingResolver);
        (handler, Some(resolver))
    }

    fn password() -> AuthenticationTransaction {
        AuthenticationTransaction::single(Credential::username_password("casuser", "Mellon"))
    }

    #[tokio::test]
    async fn test_union_of_successful_principals_first_wins() {
        let manager = manager_with(
            vec![
                handler(FixedHandler::success(
                    "first",
                    Principal::new("casuser")
                        .with_attribute("email", "first@example.org")
                        .with_attribute("cn", "Cas User"),
                )),
                handler(FixedHandler::failure(
                    "broken",
                    HandlerError::Rejected("nope".to_string()),
                )),
                handler(FixedHandler::success(
                    "second",
                    Principal::new("other-id")
                        .with_attribute("email", "second@example.org")
                        .with_attribute("role", "admin"),
                )),
            ],
            AuthenticationConfig::default(),
        );

        let auth = manager.authenticate(&password()).await.unwrap();
        assert_eq!(auth.principal.id, "casuser");
        assert_eq!(auth.principal.get_attribute("email"), Some("first@example.org"));
        assert_eq!(auth.principal.get_attribute("cn"), Some("Cas User"));
        assert_eq!(auth.principal.get_attribute("role"), Some("admin"));
        assert_eq!(auth.successful_handlers, vec!["first", "second"]);
        assert_eq!(auth.failures.len(), 1);
        assert_eq!(auth.failures[0].handler, "broken");
        assert_eq!(auth.credentials[0].id, "casuser");
    }

    #[tokio::test]
    async fn test_first_merge_policy_keeps_only_first_principal() {
        let config = AuthenticationConfig {
            merge_policy: PrincipalMergePolicy::First,
            ..Default::default()
        };
        let manager = manager_with(
            vec![
                handler(FixedHandler::success("first", Principal::new("casuser"))),
                handler(FixedHandler::success(
                    "second",
                    Principal::new("casuser").with_attribute("role", "admin"),
                )),
            ],
            config,
        );

        let auth = manager.authenticate(&password()).await.unwrap();
        assert!(auth.principal.attributes.is_empty());
        assert_eq!(auth.successful_handlers, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_unanimous_failure_enumerates_every_handler() {
        let manager = manager_with(
            vec![
                handler(FixedHandler::failure(
                    "rejecting",
                    HandlerError::Rejected("bad password".to_string()),
                )),
                handler(FixedHandler::failure(
                    "offline",
                    HandlerError::Unavailable("ldap down".to_string()),
                )),
                unresolvable(FixedHandler::success("unresolvable", Principal::new("casuser"))),
            ],
            AuthenticationConfig::default(),
        );

        let err = manager.authenticate(&password()).await.unwrap_err();
        let AuthenticationError::Aggregate { failures } = err else {
            panic!("expected aggregate failure");
        };
        let kinds: Vec<(&str, FailureKind)> =
            failures.iter().map(|f| (f.handler.as_str(), f.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("rejecting", FailureKind::CredentialRejected),
                ("offline", FailureKind::HandlerUnavailable),
                ("unresolvable", FailureKind::PrincipalResolution),
            ]
        );
    }

    #[tokio::test]
    async fn test_resolution_failure_ignored_when_not_fatal() {
        let manager = manager_with(
            vec![
                unresolvable(FixedHandler::success("unresolvable", Principal::new("x"))),
                handler(FixedHandler::success("good", Principal::new("casuser"))),
            ],
            AuthenticationConfig::default(),
        );

        let auth = manager.authenticate(&password()).await.unwrap();
        assert_eq!(auth.principal.id, "casuser");
        assert_eq!(auth.failures[0].kind, FailureKind::PrincipalResolution);
        assert_eq!(
            auth.attempts,
            vec![
                HandlerAttempt {
                    handler: "unresolvable".to_string(),
                    success: false,
                },
                HandlerAttempt {
                    handler: "good".to_string(),
                    success: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_resolution_failure_fatal_aborts_despite_success() {
        let config = AuthenticationConfig {
            principal_resolution_failure_fatal: true,
            ..Default::default()
        };
        let manager = manager_with(
            vec![
                handler(FixedHandler::success("good", Principal::new("casuser"))),
                unresolvable(FixedHandler::success("unresolvable", Principal::new("x"))),
            ],
            config,
        );

        let err = manager.authenticate(&password()).await.unwrap_err();
        assert!(matches!(
            err,
            AuthenticationError::PrincipalResolution { ref failure } if failure.handler == "unresolvable"
        ));
    }

    #[tokio::test]
    async fn test_empty_transaction_and_unsupported_credential() {
        let manager = manager_with(
            vec![handler(FixedHandler::success("good", Principal::new("casuser")))],
            AuthenticationConfig::default(),
        );

        let empty = manager.authenticate(&AuthenticationTransaction::of(vec![])).await;
        assert!(matches!(empty, Err(AuthenticationError::EmptyTransaction)));

        let unsupported = manager
            .authenticate(&AuthenticationTransaction::single(Credential::ApiKey {
                key: "k".to_string(),
            }))
            .await
            .unwrap_err();
        assert!(unsupported.failures().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_slow_handlers() {
        let completed = Arc::new(AtomicBool::new(false));
        let slow = FixedHandler {
            name: "slow",
            result: Ok(Principal::new("casuser").with_attribute("slow", "yes")),
            delay_ms: 50,
            completed: Some(completed.clone()),
        };
        let manager = manager_with(
            vec![
                handler(FixedHandler::success("fast", Principal::new("casuser"))),
                handler(slow),
            ],
            AuthenticationConfig::default(),
        );

        let auth = manager.authenticate(&password()).await.unwrap();
        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(auth.principal.get_attribute("slow"), Some("yes"));
    }

    #[tokio::test]
    async fn test_abandoned_transaction_lets_handlers_finish() {
        let completed = Arc::new(AtomicBool::new(false));
        let slow = FixedHandler {
            name: "slow",
            result: Ok(Principal::new("casuser")),
            delay_ms: 50,
            completed: Some(completed.clone()),
        };
        let manager = manager_with(vec![handler(slow)], AuthenticationConfig::default());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), manager.authenticate(&password())).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(completed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_result_builder_combines_steps() {
        let now = Utc::now();
        let first = Authentication {
            authenticated_at: now,
            principal: Principal::new("casuser").with_attribute("email", "a@example.org"),
            successful_handlers: vec!["password".to_string()],
            failures: vec![],
            attempts: vec![],
            attributes: Attributes::from([(
                "credentialType".to_string(),
                vec!["UsernamePasswordCredential".to_string()],
            )]),
            credentials: vec![],
        };
        let second = Authentication {
            authenticated_at: now + chrono::Duration::seconds(30),
            principal: Principal::new("casuser")
                .with_attribute("email", "ignored@example.org")
                .with_attribute("otp", "verified"),
            successful_handlers: vec!["otp".to_string()],
            failures: vec![HandlerFailure::rejected("sms", "not enrolled")],
            attempts: vec![],
            attributes: Attributes::from([(
                "authnContextClass".to_string(),
                vec!["mfa-otp".to_string()],
            )]),
            credentials: vec![],
        };

        let mut builder = AuthenticationResultBuilder::new();
        builder.collect(first).collect(second);
        assert_eq!(
            builder.initial_authentication().map(|a| a.successful_handlers.clone()),
            Some(vec!["password".to_string()])
        );

        let combined = builder.build().unwrap();
        assert_eq!(combined.principal.get_attribute("email"), Some("a@example.org"));
        assert_eq!(combined.principal.get_attribute("otp"), Some("verified"));
        assert_eq!(combined.successful_handlers, vec!["password", "otp"]);
        assert_eq!(combined.failures.len(), 1);
        assert!(combined.attributes.contains_key("authnContextClass"));
        assert_eq!(combined.authenticated_at, now + chrono::Duration::seconds(30));

        assert!(AuthenticationResultBuilder::new().build().is_none());
    }
}
