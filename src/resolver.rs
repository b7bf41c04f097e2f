//! # Constraint Resolver
//!
//! When a bulk insert is rejected for a foreign key, the resolver narrows the
//! batch to the rows whose reference, under that one relationship, still
//! points at an existing entity.
//!
//! ```text
//! batch (5 rows)          relationship = Account
//!   a1 a1 a2 a3 a3   ──►  distinct {a1, a2, a3}
//!                         store.existing_ids → {a1, a3}
//!                    ◄──  keep a1 a1 a3 a3
//! ```
//!
//! Account-scoped references (clients, tokens) are checked as
//! `(account_id, id)` pairs so an id that exists under a different account
//! does not count.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::store::EventStore;
use crate::types::{EntityKind, PersistedRecord, Relationship};

/// Reduces `batch` to rows that are valid under `relationship`.
///
/// An [`Relationship::Unknown`] constraint cannot be narrowed, so the whole
/// batch is dropped. Existence-query failures are fatal and propagate.
pub fn reduce<S: EventStore + ?Sized>(
    store: &mut S,
    batch: Vec<PersistedRecord>,
    relationship: &Relationship,
) -> Result<Vec<PersistedRecord>> {
    if batch.is_empty() {
        return Ok(batch);
    }

    match relationship {
        Relationship::Account => {
            let ids: BTreeSet<_> = batch
                .iter()
                .map(|row| row.event.account_id.as_uuid())
                .collect();
            let existing = store.existing_ids(EntityKind::Account, &ids)?;

            Ok(batch
                .into_iter()
                .filter(|row| existing.contains(&row.event.account_id.as_uuid()))
                .collect())
        }
        Relationship::Client => reduce_pairs(store, batch, EntityKind::Client, |row| {
            (row.event.account_id.as_uuid(), row.event.client_id.as_uuid())
        }),
        Relationship::Token => reduce_pairs(store, batch, EntityKind::Token, |row| {
            (row.event.account_id.as_uuid(), row.event.token_id.as_uuid())
        }),
        Relationship::Unknown(_) => Ok(Vec::new()),
    }
}

fn reduce_pairs<S, F>(
    store: &mut S,
    batch: Vec<PersistedRecord>,
    kind: EntityKind,
    key: F,
) -> Result<Vec<PersistedRecord>>
where
    S: EventStore + ?Sized,
    F: Fn(&PersistedRecord) -> (uuid::Uuid, uuid::Uuid),
{
    let pairs: BTreeSet<_> = batch.iter().map(&key).collect();
    let existing = store.existing_pairs(kind, &pairs)?;

    Ok(batch
        .into_iter()
        .filter(|row| existing.contains(&key(row)))
        .collect())
}
