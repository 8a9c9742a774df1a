//! Isopod evaluator.
//!
//! A process evaluates a [`Lazy`] expression against a [`Vm`]: a port
//! table, a namespace snapshot, and a step counter. Device interactions
//! leave the VM through the [`PortBackend`] seam as little-endian 32-bit
//! word buffers and come back the same way; everything else is pure
//! reduction over the value model.

mod error;
mod lazy;
mod port;
mod vm;

pub use error::{PortError, VmError};
pub use lazy::Lazy;
pub use port::{bytes_to_words, word_len, words_to_bytes, PortBackend};
pub use vm::Vm;

/// Result alias for evaluator operations.
pub type Result<T> = std::result::Result<T, VmError>;
