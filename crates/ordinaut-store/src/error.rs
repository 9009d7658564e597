//! Store-level error taxonomy. `Conflict` is expected under concurrency
//! (e.g. a lease-renewal race) and callers should treat it as informational;
//! `Backend` means the database itself failed and is the one that should
//! feed retry/backoff logic in the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
