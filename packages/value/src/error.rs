//! Error type for the value model.
//!
//! Errors at this level are about shape: a value that does not inhabit the
//! type it is marshalled at, a buffer that is too short for a root, a blob
//! that a load cannot reach. Storage backends report their own failures
//! through the opaque `Store` variant.

use crate::store::BlobId;

/// Errors from marshalling, loading, and the JSON coder.
#[derive(Debug)]
pub enum ValueError {
    /// The value does not inhabit the type it was used at.
    WrongType { message: String },

    /// A buffer was too short for the fixed-width form being read or written.
    ShortBuffer { need: usize, got: usize },

    /// A referenced blob is not present in the store.
    NotFound { id: BlobId },

    /// A blob's bytes disagree with the ref that named them.
    Corrupt { id: BlobId, message: String },

    /// The storage backend failed.
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl ValueError {
    pub(crate) fn wrong_type(message: impl Into<String>) -> Self {
        ValueError::WrongType {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueError::WrongType { message } => write!(f, "wrong type: {}", message),
            ValueError::ShortBuffer { need, got } => {
                write!(f, "short buffer: need {} bytes, got {}", need, got)
            }
            ValueError::NotFound { id } => write!(f, "blob not found: {}", id),
            ValueError::Corrupt { id, message } => {
                write!(f, "corrupt blob {}: {}", id, message)
            }
            ValueError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for ValueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ValueError::Store(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_the_shape() {
        let e = ValueError::ShortBuffer { need: 72, got: 4 };
        let s = format!("{}", e);
        assert!(s.contains("72"));
        assert!(s.contains("4"));
    }

    #[test]
    fn store_error_has_source() {
        use std::error::Error as StdError;
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let e = ValueError::Store(Box::new(io));
        assert!(StdError::source(&e).is_some());
    }
}
