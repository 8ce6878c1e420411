//! Ticket registry backed by the redb embedded database.
//!
//! Tickets are stored as MessagePack under their id, with a second table
//! indexing children by parent id. Hot tickets are cached in memory.

use anyhow::{anyhow, bail, Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

use super::registry::TicketRegistry;
use super::types::{Ticket, TicketId};

/// redb table for tickets (key: ticket id, value: MessagePack bytes).
const TICKETS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tickets");

/// redb table for lineage (key: parent id, value: MessagePack list of child ids).
const CHILDREN_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("ticket_children");

const DEFAULT_MAX_CACHE_SIZE: usize = 10000;

/// Persistent ticket registry.
pub struct RedbTicketRegistry {
    db: Database,

    /// Write-through cache. Held for writing across every write transaction so
    /// the cache never falls behind committed state.
    cache: RwLock<HashMap<TicketId, Ticket>>,

    max_cache_size: usize,
}

impl RedbTicketRegistry {
    /// Open or create a registry at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open ticket database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TICKETS_TABLE)?;
            let _ = write_txn.open_table(CHILDREN_TABLE)?;
        }
        write_txn.commit()?;

        let cache = Self::load_active_tickets(&db, DEFAULT_MAX_CACHE_SIZE)?;
        debug!(tickets = cache.len(), "Loaded active tickets into cache");

        Ok(Self {
            db,
            cache: RwLock::new(cache),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
        })
    }

    fn read_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TICKETS_TABLE)?;
        let ticket = match table.get(id.as_str())? {
            Some(value) => Some(
                rmp_serde::from_slice::<Ticket>(value.value())
                    .with_context(|| format!("Failed to deserialize ticket {}", id))?,
            ),
            None => None,
        };
        Ok(ticket)
    }

    fn write_ticket(txn: &WriteTransaction, ticket: &Ticket) -> Result<()> {
        let data = rmp_serde::to_vec(ticket).context("Failed to serialize ticket")?;
        let mut table = txn.open_table(TICKETS_TABLE)?;
        table.insert(ticket.id.as_str(), data.as_slice())?;
        Ok(())
    }

    fn read_children(txn: &WriteTransaction, parent: &TicketId) -> Result<Vec<String>> {
        let table = txn.open_table(CHILDREN_TABLE)?;
        let children = match table.get(parent.as_str())? {
            Some(value) => rmp_serde::from_slice(value.value())
                .with_context(|| format!("Failed to deserialize children of {}", parent))?,
            None => Vec::new(),
        };
        Ok(children)
    }

    fn write_children(txn: &WriteTransaction, parent: &TicketId, children: &[String]) -> Result<()> {
        let mut table = txn.open_table(CHILDREN_TABLE)?;
        if children.is_empty() {
            table.remove(parent.as_str())?;
        } else {
            let data = rmp_serde::to_vec(children)?;
            table.insert(parent.as_str(), data.as_slice())?;
        }
        Ok(())
    }

    fn cache_insert(&self, cache: &mut HashMap<TicketId, Ticket>, ticket: Ticket) {
        if cache.len() >= self.max_cache_size && !cache.contains_key(&ticket.id) {
            Self::evict_cache_lru(cache);
        }
        cache.insert(ticket.id.clone(), ticket);
    }

    /// Load non-terminal tickets into cache, most recently used first.
    fn load_active_tickets(db: &Database, limit: usize) -> Result<HashMap<TicketId, Ticket>> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TICKETS_TABLE)?;

        let mut active = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match rmp_serde::from_slice::<Ticket>(value.value()) {
                Ok(ticket) if !ticket.state.is_terminal() => active.push(ticket),
                Ok(_) => {}
                Err(e) => {
                    warn!(key = key.value(), error = %e, "Failed to deserialize ticket, skipping");
                }
            }
        }

        active.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(active
            .into_iter()
            .take(limit)
            .map(|t| (t.id.clone(), t))
            .collect())
    }

    /// Drop the least recently used ticket from cache.
    fn evict_cache_lru(cache: &mut HashMap<TicketId, Ticket>) {
        if let Some(oldest) = cache
            .iter()
            .min_by_key(|(_, t)| t.last_used_at)
            .map(|(id, _)| id.clone())
        {
            cache.remove(&oldest);
        }
    }
}

impl TicketRegistry for RedbTicketRegistry {
    fn add(&self, ticket: Ticket) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("Ticket cache lock poisoned"))?;

        let write_txn = self.db.begin_write()?;
        {
            let exists = write_txn
                .open_table(TICKETS_TABLE)?
                .get(ticket.id.as_str())?
                .is_some();
            if exists {
                bail!("Ticket {} already exists", ticket.id);
            }
            Self::write_ticket(&write_txn, &ticket)?;
            if let Some(ref parent) = ticket.parent {
                let mut children = Self::read_children(&write_txn, parent)?;
                children.push(ticket.id.as_str().to_string());
                Self::write_children(&write_txn, parent, &children)?;
            }
        }
        write_txn.commit()?;

        self.cache_insert(&mut cache, ticket);
        Ok(())
    }

    fn get(&self, id: &TicketId) -> Result<Option<Ticket>> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| anyhow!("Ticket cache lock poisoned"))?;
            if let Some(ticket) = cache.get(id) {
                return Ok(Some(ticket.clone()));
            }
        }
        self.read_ticket(id)
    }

    fn update(&self, id: &TicketId, f: &mut dyn FnMut(&mut Ticket)) -> Result<Option<Ticket>> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("Ticket cache lock poisoned"))?;

        let write_txn = self.db.begin_write()?;
        let stored = {
            let table = write_txn.open_table(TICKETS_TABLE)?;
            let bytes = table.get(id.as_str())?.map(|v| v.value().to_vec());
            bytes
        };
        let Some(bytes) = stored else {
            return Ok(None);
        };

        let mut ticket: Ticket = rmp_serde::from_slice(&bytes)
            .with_context(|| format!("Failed to deserialize ticket {}", id))?;
        f(&mut ticket);
        Self::write_ticket(&write_txn, &ticket)?;
        write_txn.commit()?;

        self.cache_insert(&mut cache, ticket.clone());
        Ok(Some(ticket))
    }

    fn children(&self, id: &TicketId) -> Result<Vec<TicketId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHILDREN_TABLE)?;
        let children: Vec<String> = match table.get(id.as_str())? {
            Some(value) => rmp_serde::from_slice(value.value())
                .with_context(|| format!("Failed to deserialize children of {}", id))?,
            None => Vec::new(),
        };
        Ok(children.into_iter().map(TicketId::new).collect())
    }

    fn remove(&self, id: &TicketId) -> Result<bool> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("Ticket cache lock poisoned"))?;
        cache.remove(id);

        let write_txn = self.db.begin_write()?;
        let removed = {
            let bytes = {
                let mut table = write_txn.open_table(TICKETS_TABLE)?;
                let bytes = table.remove(id.as_str())?.map(|v| v.value().to_vec());
                bytes
            };
            match bytes {
                Some(bytes) => {
                    write_txn.open_table(CHILDREN_TABLE)?.remove(id.as_str())?;
                    if let Ok(ticket) = rmp_serde::from_slice::<Ticket>(&bytes) {
                        if let Some(ref parent) = ticket.parent {
                            let mut siblings = Self::read_children(&write_txn, parent)?;
                            siblings.retain(|child| child != id.as_str());
                            Self::write_children(&write_txn, parent, &siblings)?;
                        }
                    }
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;

        Ok(removed)
    }

    fn tickets(&self) -> Result<Vec<Ticket>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TICKETS_TABLE)?;

        let mut tickets = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match rmp_serde::from_slice::<Ticket>(value.value()) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    warn!(key = key.value(), error = %e, "Failed to deserialize ticket, skipping");
                }
            }
        }
        Ok(tickets)
    }

    fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TICKETS_TABLE)?;
        Ok(table.len()? as usize)
    }
}
