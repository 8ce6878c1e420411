//! SSO Ticket Authority
//!
//! Verifies credentials through a pluggable authentication plan, issues
//! ticket-granting, service, proxy and security-token tickets, and enforces
//! their expiration, lineage and revocation.

pub mod audit;
pub mod authentication;
pub mod clock;
pub mod config;
pub mod service;
pub mod sso;
pub mod ticket;

pub use audit::{AuditRecord, AuditTrail, InMemoryAuditTrail, TracingAuditTrail};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{TicketAuthorityConfig, TicketAuthorityConfigJson};
pub use service::{open_registry, Assertion, CentralAuthenticationService, ServiceError};
