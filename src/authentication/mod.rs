//! Authentication execution engine.
//!
//! Credentials are verified by pluggable handlers arranged in an execution plan;
//! the transaction manager aggregates their outcomes into an [`Authentication`].

pub mod config;
pub mod credential;
pub mod error;
pub mod handler;
pub mod manager;
pub mod metadata;
pub mod plan;
pub mod release;

pub use config::{
    AttributeReleaseConfig, AttributeReleaseConfigJson, AuthenticationConfig,
    AuthenticationConfigJson, PrincipalMergePolicy,
};
pub use credential::{Attributes, Credential, CredentialMetadata, Principal};
pub use error::{AuthenticationError, FailureKind, HandlerFailure, PlanBuildError, ResolutionError};
pub use handler::{
    ApiKeyHandler, AuthenticationHandler, EchoingPrincipalResolver, HandlerError,
    PersonDirectoryPrincipalResolver, PrincipalResolver, StaticUserHandler,
};
pub use manager::{
    Authentication, AuthenticationResultBuilder, HandlerAttempt, AuthenticationTransaction,
    AuthenticationTransactionManager, HandlerOutcome,
};
pub use metadata::{
    AuthenticationContextMetaDataPopulator, CoreAuthenticationConfigurer,
    CredentialTypeMetaDataPopulator, SuccessfulHandlerMetaDataPopulator,
    CREDENTIAL_TYPE_ATTRIBUTE, DEFAULT_AUTHN_CONTEXT_ATTRIBUTE, SUCCESSFUL_HANDLERS_ATTRIBUTE,
};
pub use plan::{
    AuthenticationExecutionPlan, AuthenticationMetaDataPopulator, AuthenticationPlan,
    AuthenticationPlanConfigurer, PlanBuilder, PlanEntry, DEFAULT_PRIORITY,
};
pub use release::{AttributeReleaseMode, AuthenticationAttributeReleasePolicy};
