//! Error types for the blob layer.

use thiserror::Error;

/// Errors from blob-store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The blob is not associated with the store (or does not exist).
    #[error("blob not found")]
    NotFound,

    /// The store id does not name a live store.
    #[error("store not found: {0}")]
    StoreNotFound(i64),

    /// The blob exceeds the maximum size.
    #[error("blob too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// The output buffer is smaller than the blob.
    #[error("short buffer: need {need} bytes, got {got}")]
    ShortBuffer { need: usize, got: usize },

    /// A SQL statement failed.
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
}
