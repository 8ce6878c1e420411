//! Ticket errors.

use thiserror::Error;

use super::types::{ExpiryReason, TicketId, TicketKind, TicketState};

/// Why a ticket was judged invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    NotFound,
    Terminal(TicketState),
    AncestorInvalid(TicketId),
    ServiceMismatch { expected: String, actual: String },
    UnexpectedKind(TicketKind),
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::NotFound => write!(f, "not found"),
            InvalidReason::Terminal(state) => write!(f, "ticket is {}", state),
            InvalidReason::AncestorInvalid(id) => write!(f, "ancestor {} is no longer valid", id),
            InvalidReason::ServiceMismatch { expected, actual } => {
                write!(f, "issued for {} but presented by {}", expected, actual)
            }
            InvalidReason::UnexpectedKind(kind) => write!(f, "unexpected ticket kind {}", kind),
        }
    }
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("invalid ticket {id}: {reason}")]
    InvalidTicket { id: TicketId, reason: InvalidReason },

    #[error("ticket {id} expired: {reason}")]
    ExpiredTicket { id: TicketId, reason: ExpiryReason },

    #[error("no ticket definition registered for prefix {0}")]
    UnknownDefinition(String),

    #[error("lineage depth {depth} exceeds the maximum of {max}")]
    LineageTooDeep { depth: u32, max: u32 },

    #[error("ticket registry failure")]
    Registry(#[from] anyhow::Error),
}

impl TicketError {
    pub fn invalid(id: &TicketId, reason: InvalidReason) -> Self {
        TicketError::InvalidTicket {
            id: id.clone(),
            reason,
        }
    }

    pub fn not_found(id: &TicketId) -> Self {
        Self::invalid(id, InvalidReason::NotFound)
    }
}
