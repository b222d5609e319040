//! Error taxonomy for the cylinder ledger.
//!
//! Every failure surfaces synchronously to the caller; nothing is
//! logged-and-swallowed inside the crate, and the crate never retries
//! on its own.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-range operator input. Nothing was persisted;
    /// the operation is fully retryable with corrected input.
    #[error("validation: {0}")]
    Validation(String),

    /// A reconciliation slot is missing its mandatory classification at a
    /// navigate or save boundary. No partial state change occurred.
    #[error("required field: {0}")]
    RequiredField(String),

    /// Underlying SQLite failure, with the original cause attached.
    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Filesystem failure while opening or preparing the database.
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    /// A reconciliation API was called in a state that does not permit it.
    #[error("invalid state: {0}")]
    State(String),

    /// The shared connection mutex was poisoned by a panicking holder.
    #[error("database lock poisoned")]
    Lock,
}

pub type Result<T> = std::result::Result<T, Error>;
