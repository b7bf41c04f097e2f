//! # SQLite Schema for SessionBuf
//!
//! This module defines the database schema and handles initialization.
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Schema Overview                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  accounts          clients                  tokens                      │
//! │  ┌──────────┐      ┌──────────────────┐     ┌──────────────────┐        │
//! │  │ id (PK)  │◄─────│ account_id (PK)  │     │ account_id (PK)  │──┐     │
//! │  └──────────┘  ▲   │ id         (PK)  │     │ id         (PK)  │  │     │
//! │       ▲        │   └──────────────────┘     └──────────────────┘  │     │
//! │       │        └──────────────────────────────────────────────────┘     │
//! │       │                 ▲ (account_id, client_id)   ▲ (account_id,      │
//! │       │                 │                           │  token_id)        │
//! │  ┌────┴─────────────────┴───────────────────────────┴──────┐            │
//! │  │ session_events                                          │            │
//! │  │ id (PK), account_id, client_id, token_id, event_type,   │            │
//! │  │ remote_addr, user_agent, payload, inserted_at_ms        │            │
//! │  └─────────────────────────────────────────────────────────┘            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Why composite keys for clients and tokens?
//!
//! A client or token identifier is only valid inside its owning account. The
//! session event references `(account_id, client_id)`, so an event can never
//! point at another account's client even if the identifier exists there.
//!
//! ### Why cascade everywhere?
//!
//! Accounts, clients and tokens are deleted by other parts of the system
//! without knowing about session events. Cascading keeps those deletes from
//! failing; buffered events that still reference the deleted rows are dealt
//! with by the bulk writer at flush time.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
const SCHEMA_VERSION: i32 = 1;

/// How long a connection waits on a locked database before failing.
pub(crate) const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// DDL Statements
// =============================================================================

/// Accounts own clients, tokens and session events.
const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY
)
"#;

/// Clients are scoped to an account.
const CREATE_CLIENTS: &str = r#"
CREATE TABLE IF NOT EXISTS clients (
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    id         TEXT NOT NULL,
    PRIMARY KEY (account_id, id)
)
"#;

/// Tokens are scoped to an account.
const CREATE_TOKENS: &str = r#"
CREATE TABLE IF NOT EXISTS tokens (
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    id         TEXT NOT NULL,
    PRIMARY KEY (account_id, id)
)
"#;

/// The `session_events` table holds persisted records.
///
/// # Columns
///
/// - `id`: UUID generated at flush time
/// - `account_id`, `client_id`, `token_id`: references (see constraints)
/// - `event_type`, `remote_addr`, `user_agent`: event fields
/// - `payload`: JSON text
/// - `inserted_at_ms`: flush timestamp, Unix milliseconds
///
/// # Constraint Names
///
/// SQLite accepts `CONSTRAINT <name>` but never reports it back. The store
/// maps the parent table reported by `PRAGMA foreign_key_check` onto these
/// names, see [`constraint_for_parent`].
const CREATE_SESSION_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS session_events (
    id             TEXT PRIMARY KEY,
    account_id     TEXT NOT NULL,
    client_id      TEXT NOT NULL,
    token_id       TEXT NOT NULL,
    event_type     TEXT NOT NULL,
    remote_addr    TEXT,
    user_agent     TEXT,
    payload        TEXT NOT NULL,
    inserted_at_ms INTEGER NOT NULL,
    CONSTRAINT session_events_account_id_fkey
        FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
    CONSTRAINT session_events_client_id_fkey
        FOREIGN KEY (account_id, client_id) REFERENCES clients(account_id, id) ON DELETE CASCADE,
    CONSTRAINT session_events_token_id_fkey
        FOREIGN KEY (account_id, token_id) REFERENCES tokens(account_id, id) ON DELETE CASCADE
)
"#;

/// Child-side indexes so cascading deletes don't scan `session_events`.
const CREATE_SESSION_EVENTS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS session_events_client ON session_events(account_id, client_id);
CREATE INDEX IF NOT EXISTS session_events_token ON session_events(account_id, token_id);
CREATE INDEX IF NOT EXISTS session_events_inserted ON session_events(inserted_at_ms);
"#;

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS sessionbuf_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// Maps the parent table of a violated foreign key to its constraint name.
pub(crate) fn constraint_for_parent(parent: &str) -> String {
    match parent {
        "accounts" => crate::types::ACCOUNT_FKEY.to_string(),
        "clients" => crate::types::CLIENT_FKEY.to_string(),
        "tokens" => crate::types::TOKEN_FKEY.to_string(),
        other => format!("session_events_{other}_fkey"),
    }
}

// =============================================================================
// Database Wrapper
// =============================================================================

/// A wrapper around a SQLite connection with the SessionBuf schema.
///
/// # Ownership
///
/// `Database` owns its `Connection`. Hand it to
/// [`SqliteStore::new`](crate::storage::SqliteStore::new) via
/// [`Database::into_connection`] to move it onto the buffer thread.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use sessionbuf::Database;
    ///
    /// let db = Database::open("sessions.db")?;
    /// # Ok::<(), sessionbuf::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize(true)?;
        Ok(db)
    }

    /// Creates an in-memory database.
    ///
    /// In-memory databases are private to their connection, so nothing else
    /// can create or delete accounts in them once the connection moves to the
    /// buffer thread. Mainly useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize(false)?;
        Ok(db)
    }

    fn initialize(&mut self, file_backed: bool) -> Result<()> {
        if file_backed {
            // WAL: readers and the flush transaction don't block each other.
            self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
            self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        }

        // Off by default in SQLite; every stale-reference check depends on it.
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_ACCOUNTS)?;
        self.conn.execute_batch(CREATE_CLIENTS)?;
        self.conn.execute_batch(CREATE_TOKENS)?;
        self.conn.execute_batch(CREATE_SESSION_EVENTS)?;
        self.conn.execute_batch(CREATE_SESSION_EVENTS_INDEXES)?;

        self.verify_or_set_version()
    }

    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM sessionbuf_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .ok();

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO sessionbuf_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, but this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Borrows the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consumes the wrapper and returns the initialized connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
