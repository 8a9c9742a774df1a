//! Error types for the evaluator.

use thiserror::Error;

use isopod_value::ValueError;

/// Errors a device backend can raise across the port boundary.
///
/// Devices translate their own failures into these before the VM sees
/// them; the VM surfaces them unchanged.
#[derive(Debug, Error)]
pub enum PortError {
    /// The calling process has been cancelled (its id fell at or below the
    /// pod's dead watermark).
    #[error("process cancelled")]
    Cancelled,

    /// The request asked for more than the device allows.
    #[error("request too large: {size} (max {max})")]
    TooLarge { size: u64, max: u64 },

    /// The request is malformed for this device.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The transport failed, or an inbound message was shed.
    #[error("network failed: {0}")]
    Network(String),

    /// The port does not implement this handler.
    #[error("operation not supported by port")]
    NotSupported,

    /// Marshalling at the boundary failed.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Backend-specific failure (database, I/O).
    #[error("port backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from evaluation.
#[derive(Debug, Error)]
pub enum VmError {
    /// The expression referenced a namespace key that is not bound.
    #[error("unbound namespace key: {0}")]
    UnboundKey(String),

    /// `Arg(i)` outside the current application's arguments.
    #[error("argument {0} out of range")]
    ArgOutOfRange(u32),

    /// Applied something that is not a lambda.
    #[error("not a function: {0}")]
    NotAFunction(String),

    /// A lambda blob failed to deserialize.
    #[error("malformed lambda: {0}")]
    MalformedLambda(String),

    /// A port identity with no entry in the port table.
    #[error("unknown port")]
    UnknownPort,

    /// Structural mistake in the expression (bad field index, bad inject).
    #[error("ill-typed expression: {0}")]
    IllTyped(String),

    /// Evaluation exceeded the step budget.
    #[error("step limit exceeded: {0}")]
    StepLimit(u64),

    /// No program imported, or no result to export.
    #[error("vm has no {0}")]
    Empty(&'static str),

    /// A device failed.
    #[error(transparent)]
    Port(#[from] PortError),

    /// Marshalling failed.
    #[error(transparent)]
    Value(#[from] ValueError),
}
