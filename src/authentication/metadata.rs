//! Authentication metadata populators and the core plan configurer.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use super::config::AuthenticationConfig;
use super::handler::{
    ApiKeyHandler, EchoingPrincipalResolver, PersonDirectoryPrincipalResolver, PrincipalResolver,
    StaticUserHandler,
};
use super::manager::{Authentication, AuthenticationTransaction};
use super::plan::{AuthenticationMetaDataPopulator, AuthenticationPlanConfigurer, PlanBuilder};

/// Names of the handlers that succeeded.
pub const SUCCESSFUL_HANDLERS_ATTRIBUTE: &str = "successfulAuthenticationHandlers";

/// Types of the submitted credentials.
pub const CREDENTIAL_TYPE_ATTRIBUTE: &str = "credentialType";

/// Default name of the multifactor authentication context attribute.
pub const DEFAULT_AUTHN_CONTEXT_ATTRIBUTE: &str = "authnContextClass";

/// Records successful handler names.
#[derive(Debug, Default)]
pub struct SuccessfulHandlerMetaDataPopulator;

impl AuthenticationMetaDataPopulator for SuccessfulHandlerMetaDataPopulator {
    fn name(&self) -> &str {
        "successful-handlers"
    }

    fn populate(&self, authentication: &mut Authentication, _transaction: &AuthenticationTransaction) {
        let handlers = authentication.successful_handlers.clone();
        for handler in handlers {
            authentication.add_attribute(SUCCESSFUL_HANDLERS_ATTRIBUTE, handler);
        }
    }
}

/// Records credential types.
#[derive(Debug, Default)]
pub struct CredentialTypeMetaDataPopulator;

impl AuthenticationMetaDataPopulator for CredentialTypeMetaDataPopulator {
    fn name(&self) -> &str {
        "credential-type"
    }

    fn populate(&self, authentication: &mut Authentication, transaction: &AuthenticationTransaction) {
        for credential in &transaction.credentials {
            authentication.add_attribute(CREDENTIAL_TYPE_ATTRIBUTE, credential.credential_type());
        }
    }
}

/// Sets the authentication context attribute when a given handler succeeded.
#[derive(Debug, Clone)]
pub struct AuthenticationContextMetaDataPopulator {
    attribute: String,
    handler: String,
    context: String,
}

impl AuthenticationContextMetaDataPopulator {
    pub fn new(attribute: impl Into<String>, handler: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            handler: handler.into(),
            context: context.into(),
        }
    }
}

impl AuthenticationMetaDataPopulator for AuthenticationContextMetaDataPopulator {
    fn name(&self) -> &str {
        "authentication-context"
    }

    fn populate(&self, authentication: &mut Authentication, _transaction: &AuthenticationTransaction) {
        if authentication.successful_handlers.contains(&self.handler) {
            authentication.add_attribute(&self.attribute, self.context.clone());
        }
    }
}

/// Registers the configured static handlers and the default populators.
pub struct CoreAuthenticationConfigurer {
    config: AuthenticationConfig,
}

impl CoreAuthenticationConfigurer {
    pub const STATIC_USERS_HANDLER: &'static str = "static-users";
    pub const API_KEYS_HANDLER: &'static str = "api-keys";

    pub fn new(config: AuthenticationConfig) -> Self {
        Self { config }
    }
}

impl AuthenticationPlanConfigurer for CoreAuthenticationConfigurer {
    fn name(&self) -> &str {
        "core-authentication"
    }

    fn configure(&self, plan: &mut PlanBuilder) -> Result<()> {
        let resolver: Arc<dyn PrincipalResolver> = if self.config.person_directory.is_empty() {
            Arc::new(EchoingPrincipalResolver)
        } else {
            info!(
                entries = self.config.person_directory.len(),
                required = self.config.require_directory_entry,
                "Resolving principals through the person directory"
            );
            Arc::new(PersonDirectoryPrincipalResolver::new(
                self.config.person_directory.clone(),
                self.config.require_directory_entry,
            ))
        };

        if !self.config.static_users.is_empty() {
            let handler =
                StaticUserHandler::from_pairs(Self::STATIC_USERS_HANDLER, &self.config.static_users);
            info!(users = handler.user_count(), "Registering static user handler");
            plan.register_handler_with_resolver(Arc::new(handler), Arc::clone(&resolver))?;
        }

        if !self.config.api_keys.is_empty() {
            plan.register_handler_with_resolver(
                Arc::new(ApiKeyHandler::from_pairs(
                    Self::API_KEYS_HANDLER,
                    &self.config.api_keys,
                )),
                resolver,
            )?;
        }

        plan.register_populator(Arc::new(SuccessfulHandlerMetaDataPopulator));
        plan.register_populator(Arc::new(CredentialTypeMetaDataPopulator));
        Ok(())
    }
}
