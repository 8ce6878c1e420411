//! Delegated authentication configuration.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::provider::{AllowedProvidersPostProcessor, DelegatedProvider, StaticProviderProducer};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DelegationConfig {
    /// Providers in offer order.
    #[serde(default)]
    pub providers: Vec<DelegatedProvider>,

    /// Provider names allowed per service id.
    #[serde(default)]
    pub allowed_providers: HashMap<String, Vec<String>>,
}

impl DelegationConfig {
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                bail!("Delegated provider name must not be empty");
            }
            if !names.insert(provider.name.as_str()) {
                bail!("Duplicate delegated provider: {}", provider.name);
            }
            if provider.redirect_url.is_empty() {
                bail!("Delegated provider {} has no redirect URL", provider.name);
            }
        }
        for (service, allowed) in &self.allowed_providers {
            if let Some(unknown) = allowed.iter().find(|name| !names.contains(name.as_str())) {
                bail!(
                    "Service {} allows unknown delegated provider {}",
                    service,
                    unknown
                );
            }
        }
        Ok(())
    }

    pub fn producer(&self) -> StaticProviderProducer {
        StaticProviderProducer::new(self.providers.clone())
    }

    pub fn post_processor(&self) -> AllowedProvidersPostProcessor {
        AllowedProvidersPostProcessor::new(self.allowed_providers.clone())
    }
}

/// Partial delegation settings applied on reload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DelegationConfigJson {
    pub providers: Option<Vec<DelegatedProvider>>,
    pub allowed_providers: Option<HashMap<String, Vec<String>>>,
}

impl DelegationConfigJson {
    pub fn apply_to(&self, config: &mut DelegationConfig) {
        if let Some(ref providers) = self.providers {
            config.providers = providers.clone();
        }
        if let Some(ref allowed) = self.allowed_providers {
            config.allowed_providers = allowed.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let config: DelegationConfig = serde_json::from_str(
            r#"{
                "providers": [
                    {"name": "okta", "redirectUrl": "https://okta.example/login", "autoRedirectType": "server"},
                    {"name": "github", "redirectUrl": "https://github.example/login"}
                ],
                "allowedProviders": {"https://app.example.org": ["okta"]}
            }"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());

        let mut unknown = config.clone();
        unknown
            .allowed_providers
            .insert("https://x.example.org".to_string(), vec!["google".to_string()]);
        assert!(unknown.validate().is_err());

        let mut duplicate = config;
        duplicate.providers.push(duplicate.providers[0].clone());
        assert!(duplicate.validate().is_err());
    }
}
