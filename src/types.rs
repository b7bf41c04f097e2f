//! # Domain Types for SessionBuf
//!
//! This module defines the records that flow through the buffer and the
//! vocabulary used to talk about their foreign-key references.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! Accounts, clients and tokens are all identified by UUIDs. Wrapping each in
//! its own newtype means a `ClientId` can never be passed where an
//! `AccountId` is expected, even though both are a `Uuid` underneath.
//!
//! ## Lifecycle of an Event
//!
//! ```text
//!   producer            buffer actor             bulk writer            store
//!      │  PendingEvent       │                        │                    │
//!      ├────────────────────►│ Vec<PendingEvent>      │                    │
//!      │                     ├───────────────────────►│ stamp id + time    │
//!      │                     │                        ├───────────────────►│
//!      │                     │                        │ PersistedRecord    │
//! ```
//!
//! The identifier and timestamp of a [`PersistedRecord`] are assigned at flush
//! time, not at submit time.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// Entity Identifiers
// =============================================================================

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Wraps an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Generates a fresh random identifier.
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of the account that owns a session.
    AccountId
);

uuid_newtype!(
    /// Identifier of the client (device) a session originated from.
    ///
    /// Only meaningful within its owning account.
    ClientId
);

uuid_newtype!(
    /// Identifier of the token that authenticated the session.
    ///
    /// Only meaningful within its owning account.
    TokenId
);

// =============================================================================
// Pending Event
// =============================================================================

/// An in-memory session event awaiting batched persistence.
///
/// # Ownership
///
/// Once submitted, the event is owned by the buffer actor until it is handed
/// to the bulk writer. Nothing else observes or mutates it.
///
/// # Example
///
/// ```rust
/// use sessionbuf::types::{AccountId, ClientId, PendingEvent, TokenId};
///
/// let event = PendingEvent::new(
///     AccountId::new_v4(),
///     ClientId::new_v4(),
///     TokenId::new_v4(),
///     "session.started",
/// )
/// .with_remote_addr("203.0.113.7")
/// .with_payload(serde_json::json!({ "resource": "db-prod" }));
///
/// assert_eq!(event.event_type, "session.started");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Owning account.
    pub account_id: AccountId,
    /// Originating client, scoped to `account_id`.
    pub client_id: ClientId,
    /// Issuing token, scoped to `account_id`.
    pub token_id: TokenId,
    /// Application-defined event name.
    pub event_type: String,
    /// Remote address the session was observed from.
    pub remote_addr: Option<String>,
    /// User agent reported by the client.
    pub user_agent: Option<String>,
    /// Arbitrary structured payload.
    pub payload: serde_json::Value,
}

impl PendingEvent {
    /// Creates an event with an empty (`null`) payload.
    pub fn new(
        account_id: AccountId,
        client_id: ClientId,
        token_id: TokenId,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            client_id,
            token_id,
            event_type: event_type.into(),
            remote_addr: None,
            user_agent: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the remote address.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// =============================================================================
// Persisted Record
// =============================================================================

/// The durable form of a [`PendingEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Unique identifier generated at flush time.
    pub id: Uuid,
    /// Milliseconds since the Unix epoch, assigned at flush time.
    pub inserted_at_ms: u64,
    /// The event as submitted.
    pub event: PendingEvent,
}

impl PersistedRecord {
    /// Stamps an event with a fresh identifier and the given timestamp.
    pub fn stamp(event: PendingEvent, inserted_at_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            inserted_at_ms,
            event,
        }
    }
}

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before 1970 yields 0 rather than panicking.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Relationships and Constraint Classification
// =============================================================================

/// Constraint name for `session_events.account_id -> accounts.id`.
pub const ACCOUNT_FKEY: &str = "session_events_account_id_fkey";

/// Constraint name for `(account_id, client_id) -> clients(account_id, id)`.
pub const CLIENT_FKEY: &str = "session_events_client_id_fkey";

/// Constraint name for `(account_id, token_id) -> tokens(account_id, id)`.
pub const TOKEN_FKEY: &str = "session_events_token_id_fkey";

/// Kinds of entity a session event references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Account,
    Client,
    Token,
}

impl EntityKind {
    /// Name of the table holding entities of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Account => "accounts",
            EntityKind::Client => "clients",
            EntityKind::Token => "tokens",
        }
    }
}

/// The relationship a foreign-key violation was reported against.
///
/// `Account` is a single-column reference; `Client` and `Token` are only
/// valid within their owning account and are checked as
/// `(account_id, id)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Relationship {
    Account,
    Client,
    Token,
    /// A constraint this crate does not know how to narrow.
    Unknown(String),
}

impl Relationship {
    /// Relationships the resolver can narrow with a targeted lookup.
    pub const KNOWN: [Relationship; 3] =
        [Relationship::Account, Relationship::Client, Relationship::Token];

    /// Maps a store constraint name to a relationship.
    pub fn from_constraint(constraint: &str) -> Self {
        match constraint {
            ACCOUNT_FKEY => Relationship::Account,
            CLIENT_FKEY => Relationship::Client,
            TOKEN_FKEY => Relationship::Token,
            other => Relationship::Unknown(other.to_string()),
        }
    }

    /// Classifies a store error.
    ///
    /// Returns `None` when the error is not a foreign-key violation at all,
    /// i.e. it is fatal.
    pub fn classify(err: &Error) -> Option<Self> {
        match err {
            Error::ForeignKeyViolation { constraint } => Some(Self::from_constraint(constraint)),
            _ => None,
        }
    }

    /// The constraint name this relationship is reported under.
    pub fn constraint(&self) -> &str {
        match self {
            Relationship::Account => ACCOUNT_FKEY,
            Relationship::Client => CLIENT_FKEY,
            Relationship::Token => TOKEN_FKEY,
            Relationship::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.constraint())
    }
}

// =============================================================================
// Flush Outcome
// =============================================================================

/// What a flush did with the rows it was handed.
///
/// For any flush that does not fail fatally,
/// `inserted + skipped == rows handed to the writer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Rows durably written.
    pub inserted: usize,
    /// Rows dropped because a reference had gone stale.
    pub skipped: usize,
}

impl FlushOutcome {
    /// Total rows accounted for.
    pub fn total(&self) -> usize {
        self.inserted + self.skipped
    }
}

// =============================================================================
// Tests
// =============================================================================
