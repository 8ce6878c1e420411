//! Ticket registry contract and the in-memory implementation.

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::RwLock;

use super::types::{Ticket, TicketId};

/// Keyed ticket storage.
///
/// `update` must be atomic per ticket id: the closure sees the current stored
/// value and its changes are persisted before any other update of the same id
/// can observe the ticket.
pub trait TicketRegistry: Send + Sync {
    /// Store a new ticket. Fails if the id is already present.
    fn add(&self, ticket: Ticket) -> Result<()>;

    fn get(&self, id: &TicketId) -> Result<Option<Ticket>>;

    /// Apply `f` to the stored ticket and persist the result. Returns the
    /// updated ticket, or `None` if the id is unknown.
    fn update(&self, id: &TicketId, f: &mut dyn FnMut(&mut Ticket)) -> Result<Option<Ticket>>;

    /// Direct children of a ticket.
    fn children(&self, id: &TicketId) -> Result<Vec<TicketId>>;

    fn remove(&self, id: &TicketId) -> Result<bool>;

    /// Snapshot of every stored ticket.
    fn tickets(&self) -> Result<Vec<Ticket>>;

    fn count(&self) -> Result<usize>;
}

#[derive(Default)]
struct Inner {
    tickets: HashMap<TicketId, Ticket>,
    children: HashMap<TicketId, Vec<TicketId>>,
}

/// Registry held entirely in process memory.
#[derive(Default)]
pub struct InMemoryTicketRegistry {
    inner: RwLock<Inner>,
}

impl InMemoryTicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketRegistry for InMemoryTicketRegistry {
    fn add(&self, ticket: Ticket) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("Ticket registry lock poisoned"))?;
        if inner.tickets.contains_key(&ticket.id) {
            bail!("Ticket {} already exists", ticket.id);
        }
        if let Some(ref parent) = ticket.parent {
            inner
                .children
                .entry(parent.clone())
                .or_default()
                .push(ticket.id.clone());
        }
        inner.tickets.insert(ticket.id.clone(), ticket);
        Ok(())
    }

    fn get(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("Ticket registry lock poisoned"))?;
        Ok(inner.tickets.get(id).cloned())
    }

    fn update(&self, id: &TicketId, f: &mut dyn FnMut(&mut Ticket)) -> Result<Option<Ticket>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("Ticket registry lock poisoned"))?;
        Ok(inner.tickets.get_mut(id).map(|ticket| {
            f(ticket);
            ticket.clone()
        }))
    }

    fn children(&self, id: &TicketId) -> Result<Vec<TicketId>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("Ticket registry lock poisoned"))?;
        Ok(inner.children.get(id).cloned().unwrap_or_default())
    }

    fn remove(&self, id: &TicketId) -> Result<bool> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("Ticket registry lock poisoned"))?;
        let Some(ticket) = inner.tickets.remove(id) else {
            return Ok(false);
        };
        inner.children.remove(id);
        if let Some(ref parent) = ticket.parent {
            if let Some(siblings) = inner.children.get_mut(parent) {
                siblings.retain(|child| child != id);
            }
        }
        Ok(true)
    }

    fn tickets(&self) -> Result<Vec<Ticket>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("Ticket registry lock poisoned"))?;
        Ok(inner.tickets.values().cloned().collect())
    }

    fn count(&self) -> Result<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("Ticket registry lock poisoned"))?;
        Ok(inner.tickets.len())
    }
}
