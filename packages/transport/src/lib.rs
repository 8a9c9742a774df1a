//! Isopod transport.
//!
//! An authenticated datagram transport for network-node devices. Every
//! frame carries the sender's Ed25519 verifying key and a signature over
//! the payload; the payload is an [`Artifact`]: a marshalled value root
//! plus the content-addressed blobs it reaches, re-verified on receipt.
//!
//! Node identities are not stored anywhere: they are derived on demand
//! from the pod secret and a key index (see [`derive_node_key`]).

mod error;
mod keys;
mod transport;
mod wire;

pub use error::TransportError;
pub use keys::{derive_node_key, PeerId};
pub use transport::{InboundHandler, Transport, MAX_DATAGRAM};
pub use wire::{Artifact, Frame};

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
