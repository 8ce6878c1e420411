//! SSO session evaluation and delegated authentication.

pub mod config;
pub mod context;
pub mod evaluator;
pub mod provider;

pub use config::{DelegationConfig, DelegationConfigJson};
pub use context::{ExternalResponse, RecordedResponse, RequestContext};
pub use evaluator::{SingleSignOnEvaluator, SsoDecision, UnauthorizedRedirectError};
pub use provider::{
    AllowedProvidersPostProcessor, AutoRedirectType, DelegatedProvider,
    DelegatedProviderPostProcessor, DelegatedProviderProducer, StaticProviderProducer,
};
