//! # SQLite Event Store
//!
//! [`SqliteStore`] is the production [`EventStore`]. It owns a single SQLite
//! connection and lives on the buffer thread.
//!
//! ## Bulk Insert with Deferred Foreign Keys
//!
//! SQLite reports a foreign-key failure as a bare `FOREIGN KEY constraint
//! failed`, without saying which constraint. To recover the constraint name
//! we defer all foreign-key checks to commit time:
//!
//! ```text
//! BEGIN IMMEDIATE
//! PRAGMA defer_foreign_keys = ON
//! INSERT ... (row 1)
//! INSERT ... (row N)
//! COMMIT ──────────────► ok: all N rows durable
//!    │
//!    └─ SQLITE_CONSTRAINT_FOREIGNKEY (transaction stays open)
//!          PRAGMA foreign_key_check(session_events)  → parent table
//!          ROLLBACK                                  → nothing written
//!          Err(ForeignKeyViolation { constraint })
//! ```
//!
//! The check only runs on the failure path, so the happy path costs one
//! transaction per flush. It scans the whole table, which may already hold
//! orphans written by a connection with foreign keys off; only violations on
//! rowids inserted by the failing transaction are considered.

use std::collections::{BTreeSet, HashSet};
use std::ops::RangeInclusive;
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::{constraint_for_parent, Database, BUSY_TIMEOUT};
use crate::store::EventStore;
use crate::types::{EntityKind, PersistedRecord};

/// Upper bound on bound parameters per existence query.
///
/// Well under SQLite's `SQLITE_MAX_VARIABLE_NUMBER` on every build.
const MAX_PARAMS_PER_QUERY: usize = 500;

const INSERT_SESSION_EVENT: &str = "INSERT INTO session_events
    (id, account_id, client_id, token_id, event_type, remote_addr, user_agent, payload, inserted_at_ms)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

// =============================================================================
// SqliteStore
// =============================================================================

/// [`EventStore`] backed by a SQLite connection.
///
/// # Thread Safety
///
/// `Connection` is `Send` but not `Sync`, which is exactly the shape the
/// buffer needs: the store is moved onto the buffer thread and never shared.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Wraps an initialized connection (see [`Database::into_connection`]).
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Opens (and initializes, if needed) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Database::open(path)?.into_connection())
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Database::open_in_memory()?.into_connection())
    }

    /// Borrows the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Inserts `rows` into the open transaction and returns the rowids they
    /// were given.
    fn insert_rows(&self, rows: &[PersistedRecord]) -> Result<Option<RangeInclusive<i64>>> {
        // Resets itself at COMMIT or ROLLBACK.
        self.conn.execute_batch("PRAGMA defer_foreign_keys = ON")?;

        let mut inserted: Option<RangeInclusive<i64>> = None;
        let mut stmt = self.conn.prepare_cached(INSERT_SESSION_EVENT)?;
        for row in rows {
            let event = &row.event;
            stmt.execute(params![
                row.id.to_string(),
                event.account_id.to_string(),
                event.client_id.to_string(),
                event.token_id.to_string(),
                event.event_type,
                event.remote_addr,
                event.user_agent,
                event.payload.to_string(),
                row.inserted_at_ms as i64,
            ])?;

            let rowid = self.conn.last_insert_rowid();
            inserted = Some(match inserted {
                Some(range) => (*range.start()).min(rowid)..=(*range.end()).max(rowid),
                None => rowid..=rowid,
            });
        }

        Ok(inserted)
    }

    /// Names the first foreign key violated by a row of the open transaction.
    ///
    /// Orphans outside `inserted` predate this transaction and are ignored.
    fn first_violation(&self, inserted: Option<RangeInclusive<i64>>) -> Result<Error> {
        let mut parent = None;
        if let Some(inserted) = inserted {
            let mut stmt = self.conn.prepare("PRAGMA foreign_key_check(session_events)")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let rowid: Option<i64> = row.get(1)?;
                if rowid.is_some_and(|id| inserted.contains(&id)) {
                    parent = Some(row.get::<_, String>(2)?);
                    break;
                }
            }
        }

        let constraint = match parent {
            Some(parent) => constraint_for_parent(&parent),
            None => "unknown".to_string(),
        };

        Ok(Error::ForeignKeyViolation { constraint })
    }

    fn rollback(&self) {
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::debug!(error = %e, "rollback after failed bulk insert");
        }
    }
}

impl EventStore for SqliteStore {
    fn bulk_insert(&mut self, rows: &[PersistedRecord]) -> Result<usize> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;

        let inserted = match self.insert_rows(rows) {
            Ok(inserted) => inserted,
            Err(e) => {
                self.rollback();
                return Err(e);
            }
        };

        match self.conn.execute_batch("COMMIT") {
            Ok(()) => Ok(rows.len()),
            Err(e) if is_foreign_key_failure(&e) => {
                let violation = self.first_violation(inserted);
                self.rollback();
                Err(violation?)
            }
            Err(e) => {
                self.rollback();
                Err(e.into())
            }
        }
    }

    fn existing_ids(&mut self, kind: EntityKind, ids: &BTreeSet<Uuid>) -> Result<HashSet<Uuid>> {
        let mut found = HashSet::with_capacity(ids.len());
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();

        for chunk in ids.chunks(MAX_PARAMS_PER_QUERY) {
            let sql = format!(
                "SELECT DISTINCT id FROM {} WHERE id IN ({})",
                kind.table(),
                placeholders(chunk.len(), "?")
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                row.get::<_, String>(0)
            })?;

            for id in rows {
                found.insert(parse_uuid(&id?, kind)?);
            }
        }

        Ok(found)
    }

    fn existing_pairs(
        &mut self,
        kind: EntityKind,
        pairs: &BTreeSet<(Uuid, Uuid)>,
    ) -> Result<HashSet<(Uuid, Uuid)>> {
        if kind == EntityKind::Account {
            return Err(Error::Store(
                "accounts are not scoped to an owner; use existing_ids".to_string(),
            ));
        }

        let mut found = HashSet::with_capacity(pairs.len());
        let flat: Vec<String> = pairs
            .iter()
            .flat_map(|(owner, id)| [owner.to_string(), id.to_string()])
            .collect();

        for chunk in flat.chunks(MAX_PARAMS_PER_QUERY) {
            let sql = format!(
                "SELECT account_id, id FROM {} WHERE (account_id, id) IN (VALUES {})",
                kind.table(),
                placeholders(chunk.len() / 2, "(?, ?)")
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            for pair in rows {
                let (owner, id) = pair?;
                found.insert((parse_uuid(&owner, kind)?, parse_uuid(&id, kind)?));
            }
        }

        Ok(found)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn is_foreign_key_failure(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

fn placeholders(count: usize, each: &str) -> String {
    vec![each; count].join(", ")
}

fn parse_uuid(raw: &str, kind: EntityKind) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| Error::Schema(format!("invalid id '{raw}' in {}: {e}", kind.table())))
}

// =============================================================================
// Tests
// =============================================================================
