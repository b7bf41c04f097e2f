//! # In-Memory Event Store
//!
//! [`MemoryStore`] implements [`EventStore`] on plain collections. It enforces
//! the same three foreign keys as the SQLite schema and reports them under the
//! same constraint names, so the bulk writer cannot tell the two apart.
//!
//! The store is a cheap, clonable handle: one clone is moved onto the buffer
//! thread while the test (or embedding application) keeps another to create
//! and delete entities and to inspect what was written.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::EventStore;
use crate::types::{
    AccountId, ClientId, EntityKind, PersistedRecord, TokenId, ACCOUNT_FKEY, CLIENT_FKEY,
    TOKEN_FKEY,
};

#[derive(Debug, Default)]
struct Inner {
    accounts: HashSet<Uuid>,
    clients: HashSet<(Uuid, Uuid)>,
    tokens: HashSet<(Uuid, Uuid)>,
    records: Vec<PersistedRecord>,
    insert_calls: usize,
    query_calls: usize,
    fail_next_insert: Option<String>,
}

impl Inner {
    /// First constraint a row violates, checked in the same order SQLite
    /// declares them.
    fn violation(&self, row: &PersistedRecord) -> Option<&'static str> {
        let account = row.event.account_id.as_uuid();
        if !self.accounts.contains(&account) {
            return Some(ACCOUNT_FKEY);
        }
        if !self.clients.contains(&(account, row.event.client_id.as_uuid())) {
            return Some(CLIENT_FKEY);
        }
        if !self.tokens.contains(&(account, row.event.token_id.as_uuid())) {
            return Some(TOKEN_FKEY);
        }
        None
    }
}

/// Shared, in-process [`EventStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Entity Management
    // =========================================================================

    pub fn add_account(&self, account: AccountId) {
        self.inner.lock().accounts.insert(account.as_uuid());
    }

    pub fn add_client(&self, account: AccountId, client: ClientId) {
        self.inner
            .lock()
            .clients
            .insert((account.as_uuid(), client.as_uuid()));
    }

    pub fn add_token(&self, account: AccountId, token: TokenId) {
        self.inner
            .lock()
            .tokens
            .insert((account.as_uuid(), token.as_uuid()));
    }

    /// Deletes an account together with its clients, tokens and persisted
    /// records, mirroring `ON DELETE CASCADE`.
    pub fn delete_account(&self, account: AccountId) {
        let id = account.as_uuid();
        let mut inner = self.inner.lock();
        inner.accounts.remove(&id);
        inner.clients.retain(|(owner, _)| *owner != id);
        inner.tokens.retain(|(owner, _)| *owner != id);
        inner.records.retain(|r| r.event.account_id != account);
    }

    pub fn delete_client(&self, account: AccountId, client: ClientId) {
        let mut inner = self.inner.lock();
        inner
            .clients
            .remove(&(account.as_uuid(), client.as_uuid()));
        inner
            .records
            .retain(|r| !(r.event.account_id == account && r.event.client_id == client));
    }

    pub fn delete_token(&self, account: AccountId, token: TokenId) {
        let mut inner = self.inner.lock();
        inner.tokens.remove(&(account.as_uuid(), token.as_uuid()));
        inner
            .records
            .retain(|r| !(r.event.account_id == account && r.event.token_id == token));
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Snapshot of every persisted record, in insertion order.
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.inner.lock().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Number of `bulk_insert` calls, successful or not.
    pub fn insert_calls(&self) -> usize {
        self.inner.lock().insert_calls
    }

    /// Number of existence queries.
    pub fn query_calls(&self) -> usize {
        self.inner.lock().query_calls
    }

    /// Makes the next `bulk_insert` fail with a fatal [`Error::Store`].
    pub fn fail_next_insert(&self, message: impl Into<String>) {
        self.inner.lock().fail_next_insert = Some(message.into());
    }
}

impl EventStore for MemoryStore {
    fn bulk_insert(&mut self, rows: &[PersistedRecord]) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.insert_calls += 1;

        if let Some(message) = inner.fail_next_insert.take() {
            return Err(Error::Store(message));
        }

        if let Some(constraint) = rows.iter().find_map(|row| inner.violation(row)) {
            return Err(Error::ForeignKeyViolation {
                constraint: constraint.to_string(),
            });
        }

        inner.records.extend_from_slice(rows);
        Ok(rows.len())
    }

    fn existing_ids(&mut self, kind: EntityKind, ids: &BTreeSet<Uuid>) -> Result<HashSet<Uuid>> {
        let mut inner = self.inner.lock();
        inner.query_calls += 1;

        let found = match kind {
            EntityKind::Account => ids
                .iter()
                .filter(|id| inner.accounts.contains(*id))
                .copied()
                .collect(),
            EntityKind::Client => ids
                .iter()
                .filter(|id| inner.clients.iter().any(|(_, c)| c == *id))
                .copied()
                .collect(),
            EntityKind::Token => ids
                .iter()
                .filter(|id| inner.tokens.iter().any(|(_, t)| t == *id))
                .copied()
                .collect(),
        };

        Ok(found)
    }

    fn existing_pairs(
        &mut self,
        kind: EntityKind,
        pairs: &BTreeSet<(Uuid, Uuid)>,
    ) -> Result<HashSet<(Uuid, Uuid)>> {
        let mut inner = self.inner.lock();
        inner.query_calls += 1;

        let table = match kind {
            EntityKind::Account => {
                return Err(Error::Store(
                    "accounts are not scoped to an owner; use existing_ids".to_string(),
                ))
            }
            EntityKind::Client => &inner.clients,
            EntityKind::Token => &inner.tokens,
        };

        Ok(pairs
            .iter()
            .filter(|pair| table.contains(*pair))
            .copied()
            .collect())
    }
}
