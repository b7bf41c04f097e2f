//! # Session Event Reader
//!
//! Read-back of what reached `session_events`. The buffer itself never
//! reads; these functions exist so operators, the load-test binary and the
//! integration tests can check what a flush actually persisted.
//!
//! ## Why Direct SQL?
//!
//! With a file database the reader uses its own connection, separate from the
//! one owned by the buffer thread. WAL mode lets it see every committed flush
//! without blocking the writer.

use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{AccountId, ClientId, PendingEvent, PersistedRecord, TokenId};

const SELECT_SESSION_EVENTS: &str = "SELECT id, account_id, client_id, token_id, event_type,
        remote_addr, user_agent, payload, inserted_at_ms
    FROM session_events
    ORDER BY inserted_at_ms, rowid
    LIMIT ?";

/// Number of persisted session events.
pub fn count_session_events(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM session_events", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Number of persisted session events owned by `account`.
pub fn count_account_events(conn: &Connection, account: AccountId) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM session_events WHERE account_id = ?",
        params![account.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Reads up to `limit` persisted records, oldest flush first.
///
/// Within one flush, rows come back in insertion order.
pub fn read_session_events(conn: &Connection, limit: usize) -> Result<Vec<PersistedRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(SELECT_SESSION_EVENTS)?;
    let rows = stmt.query_map(params![limit], RawRow::from_row)?;

    let mut records = Vec::new();
    for raw in rows {
        records.push(raw?.into_record()?);
    }

    Ok(records)
}

/// Column values as SQLite hands them back, before UUID and JSON parsing.
struct RawRow {
    id: String,
    account_id: String,
    client_id: String,
    token_id: String,
    event_type: String,
    remote_addr: Option<String>,
    user_agent: Option<String>,
    payload: String,
    inserted_at_ms: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            client_id: row.get(2)?,
            token_id: row.get(3)?,
            event_type: row.get(4)?,
            remote_addr: row.get(5)?,
            user_agent: row.get(6)?,
            payload: row.get(7)?,
            inserted_at_ms: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<PersistedRecord> {
        let payload = serde_json::from_str(&self.payload).map_err(|e| {
            Error::Store(format!("corrupt payload in session event {}: {e}", self.id))
        })?;

        Ok(PersistedRecord {
            id: uuid_column(&self.id, "id")?,
            inserted_at_ms: self.inserted_at_ms as u64,
            event: PendingEvent {
                account_id: AccountId::from_uuid(uuid_column(&self.account_id, "account_id")?),
                client_id: ClientId::from_uuid(uuid_column(&self.client_id, "client_id")?),
                token_id: TokenId::from_uuid(uuid_column(&self.token_id, "token_id")?),
                event_type: self.event_type,
                remote_addr: self.remote_addr,
                user_agent: self.user_agent,
                payload,
            },
        })
    }
}

fn uuid_column(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Store(format!("invalid uuid in session_events.{column}: {e}")))
}

// =============================================================================
// Tests
// =============================================================================
