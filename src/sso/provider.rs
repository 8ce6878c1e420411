//! Delegated identity providers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::context::RequestContext;

/// Whether the flow may redirect to a provider without user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoRedirectType {
    /// Redirect from the server before rendering anything.
    Server,
    /// Leave the redirect to the client.
    Client,
    #[default]
    None,
}

/// External identity provider the user can be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DelegatedProvider {
    pub name: String,
    pub redirect_url: String,
    #[serde(default)]
    pub auto_redirect_type: AutoRedirectType,
}

impl DelegatedProvider {
    pub fn new(
        name: impl Into<String>,
        redirect_url: impl Into<String>,
        auto_redirect_type: AutoRedirectType,
    ) -> Self {
        Self {
            name: name.into(),
            redirect_url: redirect_url.into(),
            auto_redirect_type,
        }
    }
}

/// Supplies the providers eligible for a request.
pub trait DelegatedProviderProducer: Send + Sync {
    fn produce(&self, context: &RequestContext) -> Vec<DelegatedProvider>;
}

/// Adjusts produced providers, e.g. filtering by target service.
pub trait DelegatedProviderPostProcessor: Send + Sync {
    fn process(&self, context: &RequestContext, providers: &mut Vec<DelegatedProvider>);
}

/// Produces a fixed list of providers.
#[derive(Debug, Clone, Default)]
pub struct StaticProviderProducer {
    providers: Vec<DelegatedProvider>,
}

impl StaticProviderProducer {
    pub fn new(providers: Vec<DelegatedProvider>) -> Self {
        Self { providers }
    }
}

impl DelegatedProviderProducer for StaticProviderProducer {
    fn produce(&self, _context: &RequestContext) -> Vec<DelegatedProvider> {
        self.providers.clone()
    }
}

/// Restricts providers per service. Services without an entry, and requests
/// without a service, see every provider.
#[derive(Debug, Clone, Default)]
pub struct AllowedProvidersPostProcessor {
    allowed: HashMap<String, Vec<String>>,
}

impl AllowedProvidersPostProcessor {
    pub fn new(allowed: HashMap<String, Vec<String>>) -> Self {
        Self { allowed }
    }
}

impl DelegatedProviderPostProcessor for AllowedProvidersPostProcessor {
    fn process(&self, context: &RequestContext, providers: &mut Vec<DelegatedProvider>) {
        let Some(ref service) = context.service else {
            return;
        };
        let Some(allowed) = self.allowed.get(&service.id) else {
            return;
        };

        let before = providers.len();
        providers.retain(|p| allowed.contains(&p.name));
        debug!(
            service = %service,
            kept = providers.len(),
            removed = before - providers.len(),
            "Filtered delegated providers for service"
        );
    }
}
