//! Ticket authority configuration file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::authentication::{
    AttributeReleaseConfig, AttributeReleaseConfigJson, AuthenticationConfig,
    AuthenticationConfigJson,
};
use crate::sso::{DelegationConfig, DelegationConfigJson};
use crate::ticket::{RegistryBackend, RegistryConfig, TicketsConfig, TicketsConfigJson};

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TicketAuthorityConfig {
    #[serde(default)]
    pub authentication: AuthenticationConfig,

    #[serde(default)]
    pub attribute_release: AttributeReleaseConfig,

    #[serde(default)]
    pub tickets: TicketsConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub delegation: DelegationConfig,
}

impl TicketAuthorityConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration: {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse configuration: {:?}", path))?;
        config.validate()?;

        info!(
            path = %path.display(),
            static_users = config.authentication.static_users.len(),
            api_keys = config.authentication.api_keys.len(),
            registry = ?config.registry.backend,
            providers = config.delegation.providers.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for pair in self
            .authentication
            .static_users
            .iter()
            .chain(&self.authentication.api_keys)
        {
            match pair.split_once(':') {
                Some((left, right)) if !left.trim().is_empty() && !right.trim().is_empty() => {}
                _ => bail!("Expected a colon-separated pair, got {:?}", redact(pair)),
            }
        }

        if self.attribute_release.authentication_context_attribute.is_empty() {
            bail!("attributeRelease.authenticationContextAttribute must not be empty");
        }

        let tickets = &self.tickets;
        for (kind, settings) in [
            ("tgt", &tickets.tgt),
            ("st", &tickets.st),
            ("pgt", &tickets.pgt),
            ("pt", &tickets.pt),
            ("securityToken", &tickets.security_token),
        ] {
            let expiration = &settings.expiration;
            if expiration.hard_timeout_seconds == Some(0)
                || expiration.sliding_timeout_seconds == Some(0)
            {
                bail!("tickets.{}: timeouts must be positive", kind);
            }
            if expiration.max_uses == Some(0) {
                bail!("tickets.{}: maxUses must be positive", kind);
            }
            if settings.catalog.storage_name.as_deref() == Some("") {
                bail!("tickets.{}: storageName must not be empty", kind);
            }
        }

        if self.registry.backend == RegistryBackend::Redb
            && self.registry.path.as_os_str().is_empty()
        {
            bail!("registry.path is required for the redb backend");
        }

        self.delegation.validate()
    }
}

fn redact(pair: &str) -> String {
    match pair.split_once(':') {
        Some((left, _)) => format!("{}:***", left),
        None => pair.to_string(),
    }
}

/// Partial configuration applied on reload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TicketAuthorityConfigJson {
    #[serde(default)]
    pub authentication: AuthenticationConfigJson,
    #[serde(default)]
    pub attribute_release: AttributeReleaseConfigJson,
    #[serde(default)]
    pub tickets: TicketsConfigJson,
    #[serde(default)]
    pub delegation: DelegationConfigJson,
}

impl TicketAuthorityConfigJson {
    pub fn apply_to(&self, config: &mut TicketAuthorityConfig) {
        self.authentication.apply_to(&mut config.authentication);
        self.attribute_release
            .apply_to(&mut config.attribute_release);
        self.tickets.apply_to(&mut config.tickets);
        self.delegation.apply_to(&mut config.delegation);
    }
}
