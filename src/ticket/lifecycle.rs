//! Ticket lifecycle engine.
//!
//! Tickets move from `Active` to one of the terminal states `Expired` or
//! `Revoked`. Expiration is detected lazily when a ticket is used; terminal
//! transitions cascade to every descendant, parent first.

use anyhow::Result;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::catalog::{TicketCatalog, TicketDefinition};
use super::error::{InvalidReason, TicketError};
use super::registry::TicketRegistry;
use super::types::{
    ExpiryReason, Service, Ticket, TicketId, TicketIdGenerator, TicketKind, TicketState,
};
use crate::authentication::Authentication;
use crate::clock::Clock;

/// Data attached to a new ticket.
#[derive(Debug, Clone, Default)]
pub struct TicketPayload {
    pub service: Option<Service>,
    pub authentication: Option<Authentication>,
}

impl TicketPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn authentication(authentication: Authentication) -> Self {
        Self {
            service: None,
            authentication: Some(authentication),
        }
    }

    pub fn service(service: Service) -> Self {
        Self {
            service: Some(service),
            authentication: None,
        }
    }
}

enum UseOutcome {
    Used,
    Terminal(TicketState),
    Expired(ExpiryReason),
}

/// Creates tickets from catalog definitions and drives their state transitions.
pub struct TicketLifecycleEngine {
    catalog: Arc<TicketCatalog>,
    registry: Arc<dyn TicketRegistry>,
    clock: Arc<dyn Clock>,
    ids: TicketIdGenerator,
    max_lineage_depth: u32,
}

impl TicketLifecycleEngine {
    pub fn new(
        catalog: Arc<TicketCatalog>,
        registry: Arc<dyn TicketRegistry>,
        clock: Arc<dyn Clock>,
        max_lineage_depth: u32,
    ) -> Self {
        Self {
            catalog,
            registry,
            clock,
            ids: TicketIdGenerator::new(),
            max_lineage_depth,
        }
    }

    pub fn catalog(&self) -> &Arc<TicketCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    /// Create a ticket from a definition. Issuing from a parent counts as a use
    /// of the parent.
    pub fn create(
        &self,
        definition: &TicketDefinition,
        parent: Option<&TicketId>,
        payload: TicketPayload,
    ) -> Result<Ticket, TicketError> {
        let now = self.clock.now();
        let id = self.ids.generate(&definition.prefix);

        let (root, depth) = match parent {
            Some(parent_id) => {
                let parent = self
                    .registry
                    .get(parent_id)?
                    .ok_or_else(|| TicketError::not_found(parent_id))?;
                let depth = parent.depth + 1;
                if depth > self.max_lineage_depth {
                    return Err(TicketError::LineageTooDeep {
                        depth,
                        max: self.max_lineage_depth,
                    });
                }
                self.use_ticket(parent_id)?;
                (parent.root, depth)
            }
            None => (id.clone(), 0),
        };

        let ticket = Ticket {
            id,
            kind: definition.kind,
            state: TicketState::Active,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            expiration: definition.expiration,
            parent: parent.cloned(),
            root,
            depth,
            service: payload.service,
            authentication: payload.authentication,
        };
        self.registry.add(ticket.clone())?;

        info!(
            ticket_id = %ticket.id,
            kind = %ticket.kind,
            parent = ?ticket.parent.as_ref().map(|p| p.as_str()),
            depth = ticket.depth,
            "Ticket created"
        );
        Ok(ticket)
    }

    /// Create a ticket from the catalog definition registered for `prefix`.
    pub fn create_for_prefix(
        &self,
        prefix: &str,
        parent: Option<&TicketId>,
        payload: TicketPayload,
    ) -> Result<Ticket, TicketError> {
        let definition = self
            .catalog
            .lookup(prefix)
            .ok_or_else(|| TicketError::UnknownDefinition(prefix.to_string()))?;
        self.create(&definition, parent, payload)
    }

    /// Create a ticket from the preferred catalog definition of `kind`.
    pub fn create_for_kind(
        &self,
        kind: TicketKind,
        parent: Option<&TicketId>,
        payload: TicketPayload,
    ) -> Result<Ticket, TicketError> {
        let definition = self
            .catalog
            .definition_for(kind)
            .ok_or_else(|| TicketError::UnknownDefinition(kind.default_prefix().to_string()))?;
        self.create(&definition, parent, payload)
    }

    pub fn get(&self, id: &TicketId) -> Result<Option<Ticket>, TicketError> {
        Ok(self.registry.get(id)?)
    }

    /// Record one use of an active ticket.
    ///
    /// Fails with [`TicketError::ExpiredTicket`] if the expiration policy is
    /// already exceeded (the ticket and its descendants become `Expired`) and
    /// with [`TicketError::InvalidTicket`] if the ticket or an ancestor is no
    /// longer valid.
    pub fn use_ticket(&self, id: &TicketId) -> Result<Ticket, TicketError> {
        let now = self.clock.now();
        let ticket = self
            .registry
            .get(id)?
            .ok_or_else(|| TicketError::not_found(id))?;
        if ticket.state.is_terminal() {
            debug!(ticket_id = %id, state = %ticket.state, "Rejected use of terminal ticket");
            return Err(TicketError::invalid(id, InvalidReason::Terminal(ticket.state)));
        }
        self.check_ancestors(&ticket)?;

        let mut outcome = UseOutcome::Used;
        let updated = self.registry.update(id, &mut |ticket: &mut Ticket| {
            if ticket.state.is_terminal() {
                outcome = UseOutcome::Terminal(ticket.state);
            } else if let Some(reason) = ticket.expiry_at(now) {
                ticket.state = TicketState::Expired;
                outcome = UseOutcome::Expired(reason);
            } else {
                ticket.use_count += 1;
                ticket.last_used_at = now;
                outcome = UseOutcome::Used;
            }
        })?;
        let updated = updated.ok_or_else(|| TicketError::not_found(id))?;

        match outcome {
            UseOutcome::Used => {
                debug!(ticket_id = %id, use_count = updated.use_count, "Ticket used");
                Ok(updated)
            }
            UseOutcome::Terminal(state) => {
                debug!(ticket_id = %id, state = %state, "Rejected use of terminal ticket");
                Err(TicketError::invalid(id, InvalidReason::Terminal(state)))
            }
            UseOutcome::Expired(reason) => {
                info!(ticket_id = %id, reason = %reason, "Ticket expired");
                self.cascade(id, TicketState::Expired)?;
                Err(TicketError::ExpiredTicket {
                    id: id.clone(),
                    reason,
                })
            }
        }
    }

    /// Walk to the root. A missing, terminal or logically expired ancestor
    /// invalidates the ticket.
    fn check_ancestors(&self, ticket: &Ticket) -> Result<(), TicketError> {
        let now = self.clock.now();
        let mut next = ticket.parent.clone();
        let mut seen = HashSet::new();

        while let Some(ancestor_id) = next {
            if !seen.insert(ancestor_id.clone()) {
                break;
            }
            let invalid = || {
                TicketError::invalid(&ticket.id, InvalidReason::AncestorInvalid(ancestor_id.clone()))
            };
            let Some(ancestor) = self.registry.get(&ancestor_id)? else {
                return Err(invalid());
            };
            if ancestor.state.is_terminal() {
                return Err(invalid());
            }
            if ancestor.expiry_at(now).is_some() {
                self.expire(&ancestor_id)?;
                return Err(invalid());
            }
            next = ancestor.parent;
        }
        Ok(())
    }

    /// Mark a ticket and its descendants `Expired`. Idempotent.
    pub fn expire(&self, id: &TicketId) -> Result<(), TicketError> {
        self.terminate(id, TicketState::Expired)
    }

    /// Mark a ticket and all its descendants `Revoked`, parent first.
    pub fn revoke(&self, id: &TicketId) -> Result<(), TicketError> {
        self.terminate(id, TicketState::Revoked)
    }

    fn terminate(&self, id: &TicketId, state: TicketState) -> Result<(), TicketError> {
        let mut changed = false;
        self.registry
            .update(id, &mut |ticket: &mut Ticket| {
                changed = !ticket.state.is_terminal();
                if changed {
                    ticket.state = state;
                }
            })?
            .ok_or_else(|| TicketError::not_found(id))?;

        if changed {
            info!(ticket_id = %id, state = %state, "Ticket terminated");
        }
        self.cascade(id, state)?;
        Ok(())
    }

    /// Move every active descendant of `id` to `state`, breadth first so a
    /// child never turns terminal before its parent.
    fn cascade(&self, id: &TicketId, state: TicketState) -> Result<usize> {
        let mut queue: VecDeque<TicketId> = self.registry.children(id)?.into();
        let mut seen = HashSet::new();
        let mut count = 0;

        while let Some(child) = queue.pop_front() {
            if !seen.insert(child.clone()) {
                continue;
            }
            let mut changed = false;
            self.registry.update(&child, &mut |ticket: &mut Ticket| {
                changed = !ticket.state.is_terminal();
                if changed {
                    ticket.state = state;
                }
            })?;
            if changed {
                count += 1;
            }
            queue.extend(self.registry.children(&child)?);
        }

        if count > 0 {
            info!(ticket_id = %id, state = %state, descendants = count, "Cascaded to descendants");
        }
        Ok(count)
    }

    /// Redeem a service or proxy ticket for `service`. Returns the
    /// authentication of the session the ticket was issued from.
    pub fn validate_service_ticket(
        &self,
        id: &TicketId,
        service: &Service,
    ) -> Result<Authentication, TicketError> {
        let ticket = self
            .registry
            .get(id)?
            .ok_or_else(|| TicketError::not_found(id))?;
        if !matches!(
            ticket.kind,
            TicketKind::ServiceTicket | TicketKind::ProxyTicket
        ) {
            return Err(TicketError::invalid(
                id,
                InvalidReason::UnexpectedKind(ticket.kind),
            ));
        }

        let ticket = self.use_ticket(id)?;
        if let Some(ref issued_for) = ticket.service {
            if issued_for != service {
                warn!(
                    ticket_id = %id,
                    expected = %issued_for,
                    actual = %service,
                    "Service ticket presented by a different service"
                );
                return Err(TicketError::invalid(
                    id,
                    InvalidReason::ServiceMismatch {
                        expected: issued_for.id.clone(),
                        actual: service.id.clone(),
                    },
                ));
            }
        }

        self.authentication_of(&ticket)?
            .ok_or_else(|| TicketError::invalid(id, InvalidReason::AncestorInvalid(ticket.root.clone())))
    }

    /// Nearest authentication along the lineage, starting at the ticket itself.
    pub fn authentication_of(&self, ticket: &Ticket) -> Result<Option<Authentication>, TicketError> {
        if let Some(ref authentication) = ticket.authentication {
            return Ok(Some(authentication.clone()));
        }
        let mut next = ticket.parent.clone();
        for _ in 0..=self.max_lineage_depth {
            let Some(id) = next else {
                break;
            };
            let Some(ancestor) = self.registry.get(&id)? else {
                return Ok(None);
            };
            if ancestor.authentication.is_some() {
                return Ok(ancestor.authentication);
            }
            next = ancestor.parent;
        }
        Ok(None)
    }

    /// Remove terminal and logically expired tickets, together with tickets
    /// whose ancestor is removed or missing. Returns the number removed.
    pub fn sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut tickets = self.registry.tickets()?;
        tickets.sort_by_key(|t| t.depth);

        let present: HashSet<TicketId> = tickets.iter().map(|t| t.id.clone()).collect();
        let mut doomed: HashSet<TicketId> = HashSet::new();
        for ticket in &tickets {
            let orphaned = ticket
                .parent
                .as_ref()
                .is_some_and(|p| doomed.contains(p) || !present.contains(p));
            if orphaned || !ticket.is_live_at(now) {
                doomed.insert(ticket.id.clone());
            }
        }

        let mut removed = 0;
        for ticket in tickets.iter().rev() {
            if doomed.contains(&ticket.id) && self.registry.remove(&ticket.id)? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Swept dead tickets from registry");
        }
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        self.registry.count()
    }
}
