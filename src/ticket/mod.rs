//! Ticket catalog, registry and lifecycle.
//!
//! Definitions in the [`TicketCatalog`] describe each ticket kind. The
//! [`TicketLifecycleEngine`] mints tickets from them into a [`TicketRegistry`]
//! (in memory or redb-backed) and enforces expiration and revocation.

pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod store;
pub mod types;

pub use catalog::{
    CoreTicketCatalogConfigurer, SecurityTokenTicketCatalogConfigurer, TicketCatalog,
    TicketCatalogConfigurer, TicketDefinition, TicketDefinitions, HIGHEST_PRECEDENCE,
    SECURITY_TOKEN_STORAGE_NAME,
};
pub use cleanup::spawn_cleanup_task;
pub use config::{
    RegistryBackend, RegistryConfig, TicketDefinitionConfig, TicketsConfig, TicketsConfigJson,
};
pub use error::{InvalidReason, TicketError};
pub use lifecycle::{TicketLifecycleEngine, TicketPayload};
pub use registry::{InMemoryTicketRegistry, TicketRegistry};
pub use store::RedbTicketRegistry;
pub use types::{
    ExpirationPolicy, ExpiryReason, Service, Ticket, TicketId, TicketIdGenerator, TicketKind,
    TicketState,
};
