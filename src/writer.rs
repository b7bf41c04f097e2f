//! # Bulk Writer with Stale-Reference Recovery
//!
//! The bulk writer turns a drained buffer into one all-or-nothing insert and
//! recovers when that insert is rejected because some rows reference
//! entities deleted since they were submitted.
//!
//! ## Why Not Insert Row by Row?
//!
//! One transaction per flush is what makes buffering worthwhile. The price is
//! that one stale row rejects the whole insert, so the writer has to find and
//! remove the offending rows instead of giving up on the batch:
//!
//! ```text
//! stamp ids + timestamps
//!        │
//!        ▼
//! ┌──────────────┐   ok    ┌──────────────────────────────┐
//! │ bulk_insert  ├────────►│ inserted = n, skipped = N - n│
//! └──────┬───────┘         └──────────────────────────────┘
//!        │ ForeignKeyViolation(constraint)
//!        ▼
//! ┌──────────────┐
//! │  classify    │──► Account / Client / Token / Unknown
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐  candidates shrink, retry insert
//! │  resolver    ├──────────────────────────────────► (back to bulk_insert)
//! └──────────────┘
//! ```
//!
//! ## Invariants
//!
//! - `inserted + skipped == batch.len()` whenever `write` returns `Ok`
//! - Identifiers and timestamps are assigned once per flush, before the first
//!   attempt, and survive retries unchanged
//! - An empty candidate set never reaches the store
//! - At most [`MAX_RETRY_ROUNDS`] narrowing rounds per flush
//! - Any error that is not a foreign-key violation propagates unchanged

use tracing::debug;

use crate::error::Result;
use crate::resolver;
use crate::store::EventStore;
use crate::types::{current_time_ms, FlushOutcome, PendingEvent, PersistedRecord, Relationship};

/// Upper bound on narrowing rounds in a single flush.
///
/// Each round removes every row that is stale under one relationship, so a
/// well-behaved store needs at most one round per relationship kind. The cap
/// stops a store that keeps misreporting from looping forever.
pub const MAX_RETRY_ROUNDS: usize = 3;

/// Writes batches to an [`EventStore`].
///
/// Owned by the buffer actor; never shared.
#[derive(Debug)]
pub struct BulkWriter<S> {
    store: S,
}

impl<S: EventStore> BulkWriter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persists `batch`, dropping rows whose references have gone stale.
    ///
    /// # Errors
    ///
    /// Any store failure other than a foreign-key violation. Nothing from the
    /// batch is persisted in that case.
    pub fn write(&mut self, batch: Vec<PendingEvent>) -> Result<FlushOutcome> {
        let original = batch.len();
        if original == 0 {
            return Ok(FlushOutcome::default());
        }

        let now_ms = current_time_ms();
        let mut candidates: Vec<PersistedRecord> = batch
            .into_iter()
            .map(|event| PersistedRecord::stamp(event, now_ms))
            .collect();
        let mut rounds = 0;

        loop {
            if candidates.is_empty() {
                return Ok(FlushOutcome {
                    inserted: 0,
                    skipped: original,
                });
            }

            let err = match self.store.bulk_insert(&candidates) {
                Ok(inserted) => {
                    return Ok(FlushOutcome {
                        inserted,
                        skipped: original.saturating_sub(inserted),
                    });
                }
                Err(err) => err,
            };

            let Some(relationship) = Relationship::classify(&err) else {
                return Err(err);
            };

            if rounds == MAX_RETRY_ROUNDS {
                debug!(
                    constraint = %relationship,
                    dropped = candidates.len(),
                    "giving up on batch after {MAX_RETRY_ROUNDS} narrowing rounds"
                );
                return Ok(FlushOutcome {
                    inserted: 0,
                    skipped: original,
                });
            }
            rounds += 1;

            let before = candidates.len();
            candidates = resolver::reduce(&mut self.store, candidates, &relationship)?;
            debug!(
                constraint = %relationship,
                round = rounds,
                dropped = before - candidates.len(),
                remaining = candidates.len(),
                "narrowed batch after foreign key violation"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
