//! Ticket catalog and registry configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::types::ExpirationPolicy;

/// Default bound on parent/child chains (root has depth 0).
pub const DEFAULT_MAX_LINEAGE_DEPTH: u32 = 4;

/// Default registry reclamation interval in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Storage binding and precedence overrides for one ticket definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CatalogBindingConfig {
    #[serde(default)]
    pub storage_name: Option<String>,
    #[serde(default)]
    pub precedence: Option<i32>,
}

/// Settings for one ticket kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TicketDefinitionConfig {
    #[serde(default)]
    pub expiration: ExpirationPolicy,
    #[serde(default)]
    pub catalog: CatalogBindingConfig,
}

impl TicketDefinitionConfig {
    pub fn with_expiration(expiration: ExpirationPolicy) -> Self {
        Self {
            expiration,
            catalog: CatalogBindingConfig::default(),
        }
    }
}

/// Ticket catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TicketsConfig {
    #[serde(default = "default_max_lineage_depth")]
    pub max_lineage_depth: u32,

    /// Ticket-granting tickets (SSO sessions).
    #[serde(default = "default_tgt")]
    pub tgt: TicketDefinitionConfig,

    /// Service tickets.
    #[serde(default = "default_st")]
    pub st: TicketDefinitionConfig,

    /// Proxy-granting tickets.
    #[serde(default = "default_tgt")]
    pub pgt: TicketDefinitionConfig,

    /// Proxy tickets.
    #[serde(default = "default_st")]
    pub pt: TicketDefinitionConfig,

    /// Security tokens. Without an explicit hard timeout they follow the TGT.
    #[serde(default = "default_security_token")]
    pub security_token: TicketDefinitionConfig,
}

fn default_max_lineage_depth() -> u32 {
    DEFAULT_MAX_LINEAGE_DEPTH
}

fn default_tgt() -> TicketDefinitionConfig {
    TicketDefinitionConfig::with_expiration(ExpirationPolicy::hard(28800).with_sliding(7200))
}

fn default_st() -> TicketDefinitionConfig {
    TicketDefinitionConfig::with_expiration(ExpirationPolicy::hard(10).with_max_uses(1))
}

fn default_security_token() -> TicketDefinitionConfig {
    TicketDefinitionConfig::with_expiration(ExpirationPolicy::never_expires())
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            max_lineage_depth: default_max_lineage_depth(),
            tgt: default_tgt(),
            st: default_st(),
            pgt: default_tgt(),
            pt: default_st(),
            security_token: default_security_token(),
        }
    }
}

/// Partial ticket settings applied on reload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TicketsConfigJson {
    pub max_lineage_depth: Option<u32>,
    pub tgt: Option<TicketDefinitionConfig>,
    pub st: Option<TicketDefinitionConfig>,
    pub pgt: Option<TicketDefinitionConfig>,
    pub pt: Option<TicketDefinitionConfig>,
    pub security_token: Option<TicketDefinitionConfig>,
}

impl TicketsConfigJson {
    pub fn apply_to(&self, config: &mut TicketsConfig) {
        if let Some(depth) = self.max_lineage_depth {
            config.max_lineage_depth = depth;
        }
        if let Some(ref tgt) = self.tgt {
            config.tgt = tgt.clone();
        }
        if let Some(ref st) = self.st {
            config.st = st.clone();
        }
        if let Some(ref pgt) = self.pgt {
            config.pgt = pgt.clone();
        }
        if let Some(ref pt) = self.pt {
            config.pt = pt.clone();
        }
        if let Some(ref token) = self.security_token {
            config.security_token = token.clone();
        }
    }
}

/// Ticket registry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    #[default]
    Memory,
    Redb,
}

/// Ticket registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,

    /// Database file for the redb backend.
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// Reclamation interval; 0 disables the sweeper.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("/var/lib/ticket-authority/tickets.redb")
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            path: default_registry_path(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}
