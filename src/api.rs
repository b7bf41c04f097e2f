//! # SQLite-Backed Session Buffer
//!
//! [`SessionBuffer`] is the main entry point: it opens (or creates) the
//! database, moves a [`SqliteStore`] onto a buffer thread and hands back an
//! async interface for producers.
//!
//! ## The SQLite Challenge
//!
//! SQLite's `Connection` is `!Sync`, so it can't be shared between producer
//! tasks. The write connection lives on the buffer's dedicated thread; all
//! producers reach it through a channel:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │               Tokio Runtime                    │
//! │  task1 ─┐                                      │
//! │  task2 ─┼─ submit / flush (mpsc) ─────────┐    │
//! │  task3 ─┘                                 │    │
//! └───────────────────────────────────────────┼────┘
//!                                             ▼
//!                              ┌─────────────────────────┐
//!                              │  sessionbuf-buffer      │
//!                              │  thread                 │
//!                              │   Accumulator           │
//!                              │   BulkWriter            │
//!                              │   SqliteStore (owned)   │
//!                              └─────────────────────────┘
//! ```
//!
//! ## Read Path
//!
//! For file databases, [`SessionBuffer::open_reader`] returns a separate
//! read-only connection. WAL mode lets it observe every committed flush while
//! the buffer keeps writing. A private in-memory database has no second
//! connection, so read-back is only available for files.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::buffer::{spawn_buffer, BufferHandle};
use crate::config::BufferConfig;
use crate::error::{Error, Result};
use crate::storage::SqliteStore;
use crate::types::{FlushOutcome, PendingEvent};

/// A buffered session-event writer over a SQLite database.
///
/// # Example
///
/// ```rust,ignore
/// use sessionbuf::{BufferConfig, PendingEvent, SessionBuffer};
///
/// let buffer = SessionBuffer::open("sessions.db", BufferConfig::default())?;
/// buffer.submit(PendingEvent::new(account, client, token, "session.started")).await?;
///
/// let outcome = buffer.flush().await?;
/// println!("{} persisted, {} skipped", outcome.inserted, outcome.skipped);
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuffer {
    handle: BufferHandle,
    /// `None` for an in-memory database.
    path: Option<PathBuf>,
}

impl SessionBuffer {
    /// Opens or creates a database file and starts its buffer.
    ///
    /// Needs no runtime of its own; the buffer runs on a dedicated thread.
    pub fn open(path: impl AsRef<Path>, config: BufferConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = SqliteStore::open(&path)?;
        let handle = spawn_buffer(store, config)?;

        info!(path = %path.display(), "session buffer opened");

        Ok(Self {
            handle,
            path: Some(path),
        })
    }

    /// Starts a buffer over a private in-memory database.
    pub fn open_in_memory(config: BufferConfig) -> Result<Self> {
        let store = SqliteStore::open_in_memory()?;
        let handle = spawn_buffer(store, config)?;

        Ok(Self { handle, path: None })
    }

    /// Database file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens a read-only connection to the database file.
    ///
    /// # Errors
    ///
    /// [`Error::Store`] for an in-memory buffer; [`Error::Sqlite`] if the file
    /// cannot be opened.
    pub fn open_reader(&self) -> Result<Connection> {
        let path = self.path.as_ref().ok_or_else(|| {
            Error::Store("read-back requires a file database".to_string())
        })?;

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// See [`BufferHandle::submit`].
    pub async fn submit(&self, event: PendingEvent) -> Result<()> {
        self.handle.submit(event).await
    }

    /// See [`BufferHandle::flush`].
    pub async fn flush(&self) -> Result<FlushOutcome> {
        self.handle.flush().await
    }

    /// See [`BufferHandle::pending`].
    pub async fn pending(&self) -> Result<usize> {
        self.handle.pending().await
    }

    /// Flushes what is pending and stops the buffer thread.
    pub async fn shutdown(self) -> Result<FlushOutcome> {
        self.handle.shutdown().await
    }
}

// =============================================================================
// Tests
// =============================================================================
