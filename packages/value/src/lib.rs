//! Isopod value model.
//!
//! This is the narrow waist between pods, the evaluator, and storage.
//! Everything that crosses a pod boundary is a [`Value`] with a known
//! [`Type`]: namespace entries, device requests and responses, network
//! payloads.
//!
//! A value can be *marshalled* into a fixed-width root plus side blobs
//! posted into a [`BlobStore`], and loaded back from the root. Marshalling
//! into a store transitively posts every blob the value reaches, so
//! "pull v into store S" is spelled `marshal(&v, &ty, &mut s)`.
//!
//! Large or variable-length data (lists, lambdas, the payload halves of
//! [`AnyValue`]) is kept out of line behind content-addressed [`Ref`]s;
//! fixed-width data (bit vectors, products, sums) is inline.

mod error;
mod json;
mod marshal;
mod store;
mod ty;
mod value;

pub use error::ValueError;
pub use json::{json_decode, json_encode};
pub use marshal::{load, load_any_root, marshal, marshal_any_root};
pub use store::{hash_blob, BlobId, BlobStore, MemBlobStore, NullStore, Ref};
pub use ty::{PortType, Type, ANY_VALUE_BITS, ANY_VALUE_BYTES, REF_BYTES};
pub use value::{AnyValue, Value};

/// Result alias for value-model operations.
pub type Result<T> = std::result::Result<T, ValueError>;
