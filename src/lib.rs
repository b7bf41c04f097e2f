//! # SessionBuf - Buffered Session Event Writer
//!
//! SessionBuf ingests a high-volume stream of session events and persists
//! them in batches. It provides:
//!
//! - **Cheap submits**: producers hand an event to a channel and move on
//! - **Batched writes**: one all-or-nothing insert per flush, triggered by
//!   count, by timer, or explicitly
//! - **Stale-reference recovery**: when an account, client or token was
//!   deleted after its events were submitted, only the affected rows are
//!   dropped and the rest of the batch is persisted
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Async API Layer                          │
//! │               (SessionBuffer / BufferHandle)                    │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ mpsc
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Buffer Actor                             │
//! │             (single thread, owns the event store)               │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐ │
//! │  │ Accumulator │  │ Bulk Writer │  │  Constraint Resolver    │ │
//! │  │ + ticker    │─►│ (retry loop)│◄►│  (existence queries)    │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ EventStore
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 SQLite (or in-memory store)                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Accounting**: every flush that returns `Ok` satisfies
//!    `inserted + skipped == events handed to the writer`
//! 2. **No partial writes**: a flush persists all of its surviving rows or
//!    none of them
//! 3. **Minimal loss**: a row is dropped only when one of its own
//!    references is stale
//! 4. **Serialized state**: submits, flushes and ticks never interleave
//! 5. **Fresh buffer**: the pending list is empty after every flush attempt
//!
//! ## Module Organization
//!
//! - [`error`]: Custom error types for all failure modes
//! - [`types`]: Domain types (ids, events, relationships, outcomes)
//! - [`config`]: Buffer configuration and TOML loading
//! - [`store`]: The `EventStore` trait the writer talks to
//! - [`schema`]: SQLite DDL and database initialization
//! - [`storage`]: SQLite implementation of `EventStore`
//! - [`memory`]: In-memory implementation of `EventStore`
//! - [`resolver`]: Narrowing a batch after a foreign-key violation
//! - [`writer`]: Bulk writer with bounded retry
//! - [`buffer`]: Buffer actor, scheduler and async handle
//! - [`reader`]: Read-back of persisted events
//! - [`api`]: SQLite-backed entry point

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for SessionBuf operations.
///
/// A single error enum covers stale references, fatal store failures,
/// configuration problems and a stopped buffer.
pub mod error;

/// Domain types for session events.
///
/// Newtype identifiers, the pending and persisted event forms, and the
/// relationship vocabulary used to classify foreign-key failures.
pub mod types;

/// Buffer configuration.
pub mod config;

/// The storage abstraction.
pub mod store;

/// SQLite schema definitions and database initialization.
///
/// This module contains the DDL for the entity tables and `session_events`,
/// including the named foreign-key constraints the writer recovers from.
pub mod schema;

/// SQLite event store.
pub mod storage;

/// In-memory event store.
///
/// Enforces the same foreign keys as the SQLite schema. Useful for tests and
/// for embedding the buffer in front of a store that is not SQLite.
pub mod memory;

/// Constraint resolution.
pub mod resolver;

/// Bulk writer with stale-reference recovery.
///
/// Stamps each batch with identifiers and a timestamp, inserts it in one
/// transaction, and on a foreign-key violation narrows the batch and
/// retries. Retry rounds are bounded.
pub mod writer;

/// Buffer actor.
///
/// Owns the pending events on a dedicated thread and flushes them on
/// threshold, on a timer, on request and at shutdown.
pub mod buffer;

/// Read-back of persisted session events.
pub mod reader;

/// SQLite-backed entry point.
///
/// The main entry point is [`SessionBuffer`](api::SessionBuffer).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::SessionBuffer;
pub use buffer::{spawn_buffer, Accumulator, BufferHandle, FlushTrigger};
pub use config::BufferConfig;
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use schema::Database;
pub use storage::SqliteStore;
pub use store::EventStore;
pub use writer::BulkWriter;

pub use types::{
    AccountId, ClientId, EntityKind, FlushOutcome, PendingEvent, PersistedRecord, Relationship,
    TokenId,
};
