//! Isopod blob layer.
//!
//! A content-addressed bag of bytes over SQLite, with per-store membership
//! acting as the refcount. A blob lives exactly as long as at least one
//! store holds it; dropping a store deletes its memberships and then any
//! blob nothing else references, all inside one transaction.
//!
//! The schema also carries the `pods` and `pod_ns` tables so the whole
//! system migrates through a single forward-only migration list.

mod db;
mod error;
mod migrate;
mod store;

pub use db::Db;
pub use error::BlobError;
pub use migrate::migrate;
pub use store::{
    add, create_store, delete, drop_store, exists, get, get_vec, list, post, StoreHandle,
    MAX_BLOB_SIZE,
};

/// Result alias for blob-layer operations.
pub type Result<T> = std::result::Result<T, BlobError>;
