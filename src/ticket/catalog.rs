//! Ticket catalog.
//!
//! Maps ticket id prefixes to [`TicketDefinition`]s. Duplicate prefixes are
//! resolved by precedence (lower wins), never by registration order, so the
//! resulting catalog does not depend on the order configurers are loaded in.

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::config::TicketsConfig;
use super::types::{ExpirationPolicy, TicketKind};

/// Precedence of definitions that must win every conflict.
pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;

/// Precedence of built-in definitions.
pub const DEFAULT_PRECEDENCE: i32 = 0;

/// Storage binding of security tokens.
pub const SECURITY_TOKEN_STORAGE_NAME: &str = "wsSecurityTokenTicketsCache";

/// Prefix of security tokens.
pub const SECURITY_TOKEN_PREFIX: &str = "STS";

/// Template for tickets of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDefinition {
    pub prefix: String,
    pub kind: TicketKind,
    pub expiration: ExpirationPolicy,
    pub storage_name: String,
    /// How long the storage should keep entries; `None` means unbounded.
    pub storage_timeout_seconds: Option<u64>,
    pub precedence: i32,
}

impl TicketDefinition {
    /// Definition with the kind's default prefix and storage name.
    pub fn new(kind: TicketKind, expiration: ExpirationPolicy) -> Self {
        Self {
            prefix: kind.default_prefix().to_string(),
            kind,
            expiration,
            storage_name: default_storage_name(kind).to_string(),
            storage_timeout_seconds: expiration.hard_timeout_seconds,
            precedence: DEFAULT_PRECEDENCE,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_storage(mut self, name: impl Into<String>, timeout_seconds: Option<u64>) -> Self {
        self.storage_name = name.into();
        self.storage_timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_precedence(mut self, precedence: i32) -> Self {
        self.precedence = precedence;
        self
    }
}

fn default_storage_name(kind: TicketKind) -> &'static str {
    match kind {
        TicketKind::TicketGrantingTicket => "ticketGrantingTicketsCache",
        TicketKind::ServiceTicket => "serviceTicketsCache",
        TicketKind::ProxyGrantingTicket => "proxyGrantingTicketsCache",
        TicketKind::ProxyTicket => "proxyTicketsCache",
        TicketKind::SecurityToken => SECURITY_TOKEN_STORAGE_NAME,
    }
}

/// Mutable set of definitions used while the catalog is being built.
#[derive(Debug, Clone, Default)]
pub struct TicketDefinitions {
    definitions: HashMap<String, TicketDefinition>,
}

impl TicketDefinitions {
    /// Insert unless a definition with equal or lower precedence already holds
    /// the prefix. Returns whether the set changed.
    pub fn register(&mut self, definition: TicketDefinition) -> bool {
        if let Some(existing) = self.definitions.get(&definition.prefix) {
            if existing.precedence <= definition.precedence {
                debug!(
                    prefix = %definition.prefix,
                    existing = existing.precedence,
                    candidate = definition.precedence,
                    "Ignoring ticket definition with lower priority"
                );
                return false;
            }
        }
        self.definitions
            .insert(definition.prefix.clone(), definition);
        true
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Populates the catalog during build and reload.
pub trait TicketCatalogConfigurer: Send + Sync {
    fn name(&self) -> &str;

    fn configure(&self, definitions: &mut TicketDefinitions) -> Result<()>;
}

/// Ticket type registry with atomic reload.
pub struct TicketCatalog {
    configurers: Mutex<Vec<Arc<dyn TicketCatalogConfigurer>>>,
    active: ArcSwap<TicketDefinitions>,
    /// Definitions registered outside any configurer, re-applied on reload.
    /// The lock also serializes writers; readers go through `active`.
    registered: Mutex<Vec<TicketDefinition>>,
}

impl TicketCatalog {
    pub fn new() -> Self {
        Self {
            configurers: Mutex::new(Vec::new()),
            active: ArcSwap::from_pointee(TicketDefinitions::default()),
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Catalog populated by the given configurers.
    pub fn with_configurers(configurers: Vec<Arc<dyn TicketCatalogConfigurer>>) -> Result<Self> {
        let catalog = Self::new();
        for configurer in configurers {
            catalog.add_configurer(configurer)?;
        }
        catalog.reload()?;
        Ok(catalog)
    }

    /// Catalog with the core and security-token definitions.
    pub fn from_config(config: &TicketsConfig) -> Result<Self> {
        Self::with_configurers(vec![
            Arc::new(CoreTicketCatalogConfigurer::new(config.clone())),
            Arc::new(SecurityTokenTicketCatalogConfigurer::new(config.clone())),
        ])
    }

    /// Add a configurer. Takes effect on the next [`reload`](Self::reload).
    pub fn add_configurer(&self, configurer: Arc<dyn TicketCatalogConfigurer>) -> Result<()> {
        self.configurers
            .lock()
            .map_err(|_| anyhow!("Catalog configurer lock poisoned"))?
            .push(configurer);
        Ok(())
    }

    /// Register one definition into the live catalog. It survives reloads.
    pub fn register_definition(&self, definition: TicketDefinition) -> Result<bool> {
        let mut registered = self
            .registered
            .lock()
            .map_err(|_| anyhow!("Catalog write lock poisoned"))?;

        let mut next = TicketDefinitions::clone(&self.active.load());
        let prefix = definition.prefix.clone();
        if !next.register(definition.clone()) {
            return Ok(false);
        }
        registered.push(definition);
        self.active.store(Arc::new(next));
        info!(prefix = %prefix, "Registered ticket definition");
        Ok(true)
    }

    pub fn lookup(&self, prefix: &str) -> Option<TicketDefinition> {
        self.active.load().definitions.get(prefix).cloned()
    }

    /// All definitions ordered by precedence, then prefix.
    pub fn all_definitions(&self) -> Vec<TicketDefinition> {
        let mut definitions: Vec<TicketDefinition> =
            self.active.load().definitions.values().cloned().collect();
        definitions.sort_by(|a, b| {
            a.precedence
                .cmp(&b.precedence)
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        definitions
    }

    /// Definitions of one kind, in catalog order.
    pub fn find_by_kind(&self, kind: TicketKind) -> Vec<TicketDefinition> {
        self.all_definitions()
            .into_iter()
            .filter(|d| d.kind == kind)
            .collect()
    }

    /// Preferred definition of one kind.
    pub fn definition_for(&self, kind: TicketKind) -> Option<TicketDefinition> {
        self.find_by_kind(kind).into_iter().next()
    }

    /// Rebuild from the configurers and directly registered definitions, then
    /// swap the result in. On failure the current catalog stays active.
    pub fn reload(&self) -> Result<usize> {
        let registered = self
            .registered
            .lock()
            .map_err(|_| anyhow!("Catalog write lock poisoned"))?;
        let configurers: Vec<Arc<dyn TicketCatalogConfigurer>> = self
            .configurers
            .lock()
            .map_err(|_| anyhow!("Catalog configurer lock poisoned"))?
            .clone();

        let mut next = TicketDefinitions::default();
        for configurer in &configurers {
            if let Err(e) = configurer.configure(&mut next) {
                warn!(
                    configurer = configurer.name(),
                    error = %e,
                    "Ticket catalog reload failed, keeping previous catalog"
                );
                return Err(e.context(format!(
                    "Catalog configurer {} failed",
                    configurer.name()
                )));
            }
        }

        for definition in registered.iter() {
            next.register(definition.clone());
        }

        let count = next.len();
        self.active.store(Arc::new(next));
        info!(
            definitions = count,
            registered = registered.len(),
            "Ticket catalog built"
        );
        Ok(count)
    }
}

impl Default for TicketCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn definition_from(
    kind: TicketKind,
    settings: &super::config::TicketDefinitionConfig,
) -> TicketDefinition {
    let mut definition = TicketDefinition::new(kind, settings.expiration);
    if let Some(ref storage) = settings.catalog.storage_name {
        definition.storage_name = storage.clone();
    }
    if let Some(precedence) = settings.catalog.precedence {
        definition.precedence = precedence;
    }
    definition
}

/// Registers the TGT, ST, PGT and PT definitions.
pub struct CoreTicketCatalogConfigurer {
    config: TicketsConfig,
}

impl CoreTicketCatalogConfigurer {
    pub fn new(config: TicketsConfig) -> Self {
        Self { config }
    }
}

impl TicketCatalogConfigurer for CoreTicketCatalogConfigurer {
    fn name(&self) -> &str {
        "core-tickets"
    }

    fn configure(&self, definitions: &mut TicketDefinitions) -> Result<()> {
        definitions.register(definition_from(TicketKind::TicketGrantingTicket, &self.config.tgt));
        definitions.register(definition_from(TicketKind::ServiceTicket, &self.config.st));
        definitions.register(definition_from(TicketKind::ProxyGrantingTicket, &self.config.pgt));
        definitions.register(definition_from(TicketKind::ProxyTicket, &self.config.pt));
        Ok(())
    }
}

/// Registers the security token definition, bound to its own storage whose
/// timeout follows the TGT hard timeout.
pub struct SecurityTokenTicketCatalogConfigurer {
    config: TicketsConfig,
}

impl SecurityTokenTicketCatalogConfigurer {
    pub fn new(config: TicketsConfig) -> Self {
        Self { config }
    }
}

impl TicketCatalogConfigurer for SecurityTokenTicketCatalogConfigurer {
    fn name(&self) -> &str {
        "security-token-tickets"
    }

    fn configure(&self, definitions: &mut TicketDefinitions) -> Result<()> {
        let settings = &self.config.security_token;
        let tgt_timeout = self.config.tgt.expiration.hard_timeout_seconds;

        let mut expiration = settings.expiration;
        if expiration.hard_timeout_seconds.is_none() {
            expiration.hard_timeout_seconds = tgt_timeout;
        }

        let definition = TicketDefinition::new(TicketKind::SecurityToken, expiration)
            .with_prefix(SECURITY_TOKEN_PREFIX)
            .with_storage(
                settings
                    .catalog
                    .storage_name
                    .clone()
                    .unwrap_or_else(|| SECURITY_TOKEN_STORAGE_NAME.to_string()),
                tgt_timeout,
            )
            .with_precedence(settings.catalog.precedence.unwrap_or(HIGHEST_PRECEDENCE));

        definitions.register(definition);
        Ok(())
    }
}
