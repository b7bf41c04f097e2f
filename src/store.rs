//! # Store Abstraction
//!
//! The buffer never talks to a database directly. It talks to an
//! [`EventStore`], which promises three things:
//!
//! 1. **All-or-nothing bulk insert.** Either every row of a call lands, or
//!    none does.
//! 2. **Typed foreign-key failures.** When a row references a missing
//!    entity, the insert fails with [`Error::ForeignKeyViolation`] naming the
//!    violated constraint. Every other failure is fatal.
//! 3. **Existence queries.** Point lookups for accounts and pair lookups for
//!    account-scoped entities, used to narrow a rejected batch.
//!
//! Two implementations ship with the crate:
//! [`SqliteStore`](crate::storage::SqliteStore) and
//! [`MemoryStore`](crate::memory::MemoryStore).
//!
//! [`Error::ForeignKeyViolation`]: crate::Error::ForeignKeyViolation

use std::collections::{BTreeSet, HashSet};

use uuid::Uuid;

use crate::error::Result;
use crate::types::{EntityKind, PersistedRecord};

/// Durable storage consumed by the bulk writer and constraint resolver.
///
/// # Threading
///
/// A store is moved onto the buffer's dedicated thread and used from there
/// only, so methods take `&mut self` and implementations need `Send` but not
/// `Sync`.
pub trait EventStore: Send + 'static {
    /// Inserts every row or none of them. Returns the number inserted.
    ///
    /// Never called with an empty slice.
    fn bulk_insert(&mut self, rows: &[PersistedRecord]) -> Result<usize>;

    /// Returns the subset of `ids` that currently exist as entities of `kind`.
    fn existing_ids(&mut self, kind: EntityKind, ids: &BTreeSet<Uuid>) -> Result<HashSet<Uuid>>;

    /// Returns the subset of `(account_id, id)` pairs that currently exist
    /// as entities of `kind` within that account.
    fn existing_pairs(
        &mut self,
        kind: EntityKind,
        pairs: &BTreeSet<(Uuid, Uuid)>,
    ) -> Result<HashSet<(Uuid, Uuid)>>;
}

impl<S: EventStore + ?Sized> EventStore for Box<S> {
    fn bulk_insert(&mut self, rows: &[PersistedRecord]) -> Result<usize> {
        (**self).bulk_insert(rows)
    }

    fn existing_ids(&mut self, kind: EntityKind, ids: &BTreeSet<Uuid>) -> Result<HashSet<Uuid>> {
        (**self).existing_ids(kind, ids)
    }

    fn existing_pairs(
        &mut self,
        kind: EntityKind,
        pairs: &BTreeSet<(Uuid, Uuid)>,
    ) -> Result<HashSet<(Uuid, Uuid)>> {
        (**self).existing_pairs(kind, pairs)
    }
}
