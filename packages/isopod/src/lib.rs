//! Isopod: a persistent substrate of isolated compute pods.
//!
//! A [`System`] keeps any number of pods in one SQLite database. Each
//! [`Pod`] owns a content-addressed blob store, a typed key-value
//! namespace, and a device map; computation happens in short-lived
//! processes that evaluate [`Lazy`](isopod_vm::Lazy) expressions against a
//! namespace snapshot with devices overlaid behind typed ports.
//!
//! Cancellation is generational: every process gets a fresh id from a
//! per-pod counter, and cancelling raises a dead watermark that every
//! device transaction checks. Network identity is derived, never stored:
//! each pod holds 256 bits of wrapped secret, and node keys come out of it
//! by index.

mod book;
mod config;
pub mod devices;
mod error;
mod invoke;
mod ns;
mod pod;
mod process;
mod secret;
mod system;

pub use book::AddressBook;
pub use config::{DeviceSpec, PodConfig};
pub use devices::net::{addr_to_value, value_to_addr};
pub use devices::random::MAX_RANDOM_BITS;
pub use error::Error;
pub use invoke::MAX_INVOKE_STEPS;
pub use pod::Pod;
pub use process::Process;
pub use secret::{derive_wrap_key, unwrap_secret, wrap_secret, SECRET_LEN};
pub use system::{System, SystemConfig};

pub use isopod_transport::PeerId;
pub use isopod_value::{AnyValue, Type, Value};
pub use isopod_vm::Lazy;

/// Result alias for substrate operations.
pub type Result<T> = std::result::Result<T, Error>;
