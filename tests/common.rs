#![allow(dead_code)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use sessionbuf::{AccountId, ClientId, Database, PendingEvent, TokenId};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

// =============================================================================
// Databases
// =============================================================================

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path).expect("initialize database");
    (dir, path)
}

/// A second connection for creating and deleting entities behind the
/// buffer's back.
pub fn open_admin(path: &Path) -> Connection {
    let conn = Connection::open(path).expect("open admin connection");
    conn.execute_batch("PRAGMA foreign_keys = ON")
        .expect("enable foreign keys");
    conn.busy_timeout(Duration::from_secs(5))
        .expect("set busy timeout");
    conn
}

// =============================================================================
// Entities
// =============================================================================

/// One account with one client and one token.
#[derive(Debug, Clone, Copy)]
pub struct Owner {
    pub account: AccountId,
    pub client: ClientId,
    pub token: TokenId,
}

impl Owner {
    pub fn event(&self, event_type: &str) -> PendingEvent {
        PendingEvent::new(self.account, self.client, self.token, event_type)
    }
}

pub fn seed_owner(conn: &Connection) -> Owner {
    let owner = Owner {
        account: AccountId::new_v4(),
        client: ClientId::new_v4(),
        token: TokenId::new_v4(),
    };
    conn.execute(
        "INSERT INTO accounts (id) VALUES (?)",
        params![owner.account.to_string()],
    )
    .expect("seed account");
    conn.execute(
        "INSERT INTO clients (account_id, id) VALUES (?, ?)",
        params![owner.account.to_string(), owner.client.to_string()],
    )
    .expect("seed client");
    conn.execute(
        "INSERT INTO tokens (account_id, id) VALUES (?, ?)",
        params![owner.account.to_string(), owner.token.to_string()],
    )
    .expect("seed token");
    owner
}

pub fn delete_account(conn: &Connection, account: AccountId) {
    conn.execute(
        "DELETE FROM accounts WHERE id = ?",
        params![account.to_string()],
    )
    .expect("delete account");
}

pub fn delete_client(conn: &Connection, account: AccountId, client: ClientId) {
    conn.execute(
        "DELETE FROM clients WHERE account_id = ? AND id = ?",
        params![account.to_string(), client.to_string()],
    )
    .expect("delete client");
}

pub fn delete_token(conn: &Connection, account: AccountId, token: TokenId) {
    conn.execute(
        "DELETE FROM tokens WHERE account_id = ? AND id = ?",
        params![account.to_string(), token.to_string()],
    )
    .expect("delete token");
}

// =============================================================================
// Waiting
// =============================================================================

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}

// =============================================================================
// Log Capture
// =============================================================================

/// Records every `tracing` event as `(level, "message field=value ...")`.
///
/// Buffers inherit the dispatcher of the thread that spawned them, so a
/// capture installed before `spawn_buffer` also sees the actor's lines. A
/// global capture sees them whenever it is installed.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<(Level, String)>>>);

impl LogCapture {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Installs the capture as the process-wide subscriber. Only one test
    /// per binary may call this.
    pub fn install_global() -> Self {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
        capture
    }

    pub fn lines(&self, level: Level) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Lines at info, warn or error.
    pub fn visible(&self) -> Vec<(Level, String)> {
        self.0
            .lock()
            .iter()
            .filter(|(l, _)| *l <= Level::INFO)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

struct LineVisitor(String);

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        if field.name() == "message" {
            self.0.push_str(&format!("{value:?}"));
        } else {
            self.0.push_str(&format!("{}={value:?}", field.name()));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor(String::new());
        event.record(&mut visitor);
        self.0.lock().push((*event.metadata().level(), visitor.0));
    }
}
