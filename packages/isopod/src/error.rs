//! Error types for the pod substrate.

use thiserror::Error;

use isopod_vm::PortError;

/// Errors from pod, process, and system operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A device spec or pod configuration is malformed.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The pod id does not name a live pod.
    #[error("pod not found: {0}")]
    PodNotFound(i64),

    /// The calling process fell at or below the pod's dead watermark.
    #[error("process cancelled")]
    ProcCancelled,

    /// A transport operation failed, or an inbound message was shed.
    #[error("network failed: {0}")]
    NetworkFailed(String),

    /// The stored pod secret failed to unwrap.
    #[error("pod secret: {0}")]
    Secret(String),

    /// A value failed a shape or type check.
    #[error(transparent)]
    Value(#[from] isopod_value::ValueError),

    /// The blob layer failed.
    #[error(transparent)]
    Blob(#[from] isopod_blobs::BlobError),

    /// The evaluator failed; surfaced unchanged.
    #[error("vm error: {0}")]
    Vm(#[from] isopod_vm::VmError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] isopod_transport::TransportError),

    /// A SQL statement failed.
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Disk or socket I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Translate a pod-side failure into the error a device reports across the
/// port boundary.
pub(crate) fn to_port_err(e: Error) -> PortError {
    match e {
        Error::ProcCancelled => PortError::Cancelled,
        Error::NetworkFailed(m) => PortError::Network(m),
        Error::Value(v) => PortError::Value(v),
        Error::InvalidConfig(m) => PortError::Invalid(m),
        other => PortError::Backend(Box::new(other)),
    }
}
