//! Ticket types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::authentication::Authentication;

/// Number of random bytes in a ticket id suffix (hex-encoded).
const TICKET_ID_RANDOM_BYTES: usize = 20;

/// Globally unique ticket identifier: `<prefix>-<sequence>-<random hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix identifying the ticket definition.
    pub fn prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generates ticket ids. The sequence makes ids unique within a process, the
/// random suffix across processes.
#[derive(Debug, Default)]
pub struct TicketIdGenerator {
    sequence: AtomicU64,
}

impl TicketIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self, prefix: &str) -> TicketId {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let suffix: [u8; TICKET_ID_RANDOM_BYTES] = rand::random();
        TicketId(format!("{}-{}-{}", prefix, sequence, hex::encode(suffix)))
    }
}

/// Ticket kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    TicketGrantingTicket,
    ServiceTicket,
    ProxyGrantingTicket,
    ProxyTicket,
    SecurityToken,
}

impl TicketKind {
    pub fn default_prefix(&self) -> &'static str {
        match self {
            TicketKind::TicketGrantingTicket => "TGT",
            TicketKind::ServiceTicket => "ST",
            TicketKind::ProxyGrantingTicket => "PGT",
            TicketKind::ProxyTicket => "PT",
            TicketKind::SecurityToken => "STS",
        }
    }
}

impl std::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketKind::TicketGrantingTicket => write!(f, "ticket_granting_ticket"),
            TicketKind::ServiceTicket => write!(f, "service_ticket"),
            TicketKind::ProxyGrantingTicket => write!(f, "proxy_granting_ticket"),
            TicketKind::ProxyTicket => write!(f, "proxy_ticket"),
            TicketKind::SecurityToken => write!(f, "security_token"),
        }
    }
}

/// Lifecycle state. `Expired` and `Revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Active,
    Expired,
    Revoked,
}

impl TicketState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TicketState::Active)
    }
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketState::Active => write!(f, "active"),
            TicketState::Expired => write!(f, "expired"),
            TicketState::Revoked => write!(f, "revoked"),
        }
    }
}

/// Which expiration condition fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    HardTimeout,
    SlidingTimeout,
    MaxUses,
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpiryReason::HardTimeout => write!(f, "hard timeout reached"),
            ExpiryReason::SlidingTimeout => write!(f, "sliding timeout reached"),
            ExpiryReason::MaxUses => write!(f, "maximum uses reached"),
        }
    }
}

/// Expiration policy. Unset limits never trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ExpirationPolicy {
    #[serde(default)]
    pub hard_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub sliding_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_uses: Option<u64>,
}

impl ExpirationPolicy {
    pub fn never_expires() -> Self {
        Self::default()
    }

    pub fn hard(seconds: u64) -> Self {
        Self {
            hard_timeout_seconds: Some(seconds),
            ..Self::default()
        }
    }

    pub fn with_sliding(mut self, seconds: u64) -> Self {
        self.sliding_timeout_seconds = Some(seconds);
        self
    }

    pub fn with_max_uses(mut self, uses: u64) -> Self {
        self.max_uses = Some(uses);
        self
    }

    /// First condition that holds at `now`, if any.
    pub fn check(
        &self,
        created_at: DateTime<Utc>,
        last_used_at: DateTime<Utc>,
        use_count: u64,
        now: DateTime<Utc>,
    ) -> Option<ExpiryReason> {
        if let Some(hard) = self.hard_timeout_seconds {
            if now - created_at >= seconds(hard) {
                return Some(ExpiryReason::HardTimeout);
            }
        }
        if let Some(sliding) = self.sliding_timeout_seconds {
            if now - last_used_at >= seconds(sliding) {
                return Some(ExpiryReason::SlidingTimeout);
            }
        }
        if let Some(max) = self.max_uses {
            if use_count >= max {
                return Some(ExpiryReason::MaxUses);
            }
        }
        None
    }
}

/// Longer limits are clamped; chrono durations are bounded.
const MAX_POLICY_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_POLICY_SECONDS) as i64)
}

/// Target service a ticket is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Service {
    pub id: String,
}

impl Service {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Stored ticket instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub kind: TicketKind,
    pub state: TicketState,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub use_count: u64,
    pub expiration: ExpirationPolicy,
    /// Ticket this one was issued from.
    pub parent: Option<TicketId>,
    /// Oldest ancestor; equals `id` for a root ticket.
    pub root: TicketId,
    /// Distance from the root.
    pub depth: u32,
    pub service: Option<Service>,
    /// Authentication payload, set on granting tickets.
    pub authentication: Option<Authentication>,
}

impl Ticket {
    /// Expiration condition in effect at `now`, ignoring state.
    pub fn expiry_at(&self, now: DateTime<Utc>) -> Option<ExpiryReason> {
        self.expiration
            .check(self.created_at, self.last_used_at, self.use_count, now)
    }

    /// Active and within policy.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && self.expiry_at(now).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_id_format() {
        let generator = TicketIdGenerator::new();
        let first = generator.generate("TGT");
        let second = generator.generate("TGT");

        assert_ne!(first, second);
        assert_eq!(first.prefix(), "TGT");

        let parts: Vec<&str> = first.as_str().splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2].len(), TICKET_ID_RANDOM_BYTES * 2);
        assert!(second.as_str().starts_with("TGT-2-"));
    }

    #[test]
    fn test_policy_thresholds_are_inclusive() {
        let created = Utc::now();
        let policy = ExpirationPolicy::hard(7200).with_sliding(600).with_max_uses(3);

        assert_eq!(policy.check(created, created, 0, created), None);
        assert_eq!(
            policy.check(created, created, 0, created + Duration::seconds(7200)),
            Some(ExpiryReason::HardTimeout)
        );
        assert_eq!(
            policy.check(created, created, 0, created + Duration::seconds(600)),
            Some(ExpiryReason::SlidingTimeout)
        );
        assert_eq!(
            policy.check(created, created, 0, created + Duration::seconds(599)),
            None
        );
        assert_eq!(policy.check(created, created, 3, created), Some(ExpiryReason::MaxUses));
        assert_eq!(policy.check(created, created, 2, created), None);
    }

    #[test]
    fn test_never_expires() {
        let created = Utc::now();
        let policy = ExpirationPolicy::never_expires();
        assert_eq!(
            policy.check(created, created, u64::MAX, created + Duration::days(3650)),
            None
        );
    }

    #[test]
    fn test_policy_parse() {
        let policy: ExpirationPolicy =
            serde_json::from_str(r#"{"hardTimeoutSeconds": 7200, "maxUses": 1}"#).unwrap();
        assert_eq!(policy.hard_timeout_seconds, Some(7200));
        assert_eq!(policy.sliding_timeout_seconds, None);
        assert_eq!(policy.max_uses, Some(1));
    }
}
