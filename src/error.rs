//! # Error Handling for SessionBuf
//!
//! A single error enum ([`Error`]) covers every failure mode of the buffer,
//! the bulk writer and the stores behind them.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations:
//! - `Display` comes from the `#[error(...)]` attributes
//! - `From` conversions come from the `#[from]` attributes
//!
//! ## Error Categories
//!
//! | Category | Examples | Handled By |
//! |----------|----------|------------|
//! | Stale reference | Account deleted before flush | Bulk writer (retry with fewer rows) |
//! | Fatal store | SQLite I/O error, schema mismatch | Propagated to `flush()` caller |
//! | Lifecycle | Buffer already shut down | Caller |
//! | Configuration | Zero flush threshold, bad TOML | Caller at startup |

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in SessionBuf operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Recoverable (never escapes the bulk writer)
    // =========================================================================

    /// A bulk insert was rejected because a row references an entity that no
    /// longer exists.
    ///
    /// # When This Happens
    ///
    /// An account, client or token referenced by a buffered event was deleted
    /// between `submit` and the flush. The store rolls the whole insert back
    /// and names the first violated constraint.
    ///
    /// # Recovery
    ///
    /// The bulk writer classifies `constraint` into a
    /// [`Relationship`](crate::types::Relationship), drops the offending rows
    /// and retries. Callers of `flush()` never see this variant.
    #[error("foreign key violation on constraint '{constraint}'")]
    ForeignKeyViolation {
        /// Store-level name of the violated constraint,
        /// e.g. `session_events_account_id_fkey`.
        constraint: String,
    },

    // =========================================================================
    // Fatal Store Errors
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// Wraps any error from the `rusqlite` crate: locked database, full disk,
    /// corrupted file or a bug in our SQL.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A store implementation failed for a reason other than a foreign key.
    #[error("store error: {0}")]
    Store(String),

    /// Schema version mismatch or corruption detected.
    #[error("schema error: {0}")]
    Schema(String),

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Configuration value out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// The buffer actor is gone (shut down, or its thread exited).
    #[error("buffer unavailable: {0}")]
    Shutdown(&'static str),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
