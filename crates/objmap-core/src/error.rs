//! Error types for objmap operations
//!
//! Two layers. `StoreError` is what the object-store adapter reports,
//! including the distinguished compare-predicate failure that the engine
//! recovers from internally. `MapError` is the public taxonomy: everything
//! a caller of the map can actually observe.

use thiserror::Error;

use crate::codec::TypeTag;

/// Adapter-level failure reported by an [`ObjectStore`](crate::ObjectStore)
/// call or carried in a [`BatchResult`](crate::BatchResult).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No object exists at the given id
    #[error("object not found: {obj_id}")]
    NotFound {
        /// Object id that was addressed
        obj_id: String,
    },

    /// Exclusive create lost to an existing object
    #[error("object already exists: {obj_id}")]
    AlreadyExists {
        /// Object id that was addressed
        obj_id: String,
    },

    /// The named pool does not exist in the cluster
    #[error("no such pool: {pool}")]
    NoSuchPool {
        /// Pool name that failed to resolve
        pool: String,
    },

    /// Compare-and-swap predicate did not hold; none of the other batch
    /// operations took effect. Never surfaced to map callers — the engine's
    /// retry path consumes it.
    #[error("compare predicate failed on attribute {attr}")]
    PredicateFailed {
        /// Attribute the equality predicate was asserted over
        attr: String,
    },

    /// Any other backend failure (transport, scheduling, internal)
    #[error("backend error: {message}")]
    Backend {
        /// Human-readable description
        message: String,
    },
}

impl StoreError {
    /// Create a backend error from any displayable cause.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// True for the distinguished compare-and-swap mismatch.
    #[must_use]
    pub fn is_predicate_failed(&self) -> bool {
        matches!(self, Self::PredicateFailed { .. })
    }

    /// True when the addressed object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Public error type for replicated map operations.
///
/// A failed mutation never poisons the handle: tentative local changes are
/// rolled back before the error is returned, and the handle stays usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    /// Key or value type tag outside the supported set. Raised at open.
    #[error("unsupported {role} type: {tag:?}")]
    UnsupportedType {
        /// Which slot was rejected ("key" or "value")
        role: &'static str,
        /// The offending tag
        tag: TypeTag,
    },

    /// An object-store call could not be scheduled or returned a
    /// non-predicate failure
    #[error("object store error: {0}")]
    Io(#[from] StoreError),

    /// A well-formed store response that violates map invariants
    /// (missing epoch attribute, unparseable epoch text)
    #[error("corrupt map state: {reason}")]
    CorruptState {
        /// Description of the violated invariant
        reason: String,
    },

    /// A changelog record cannot be parsed
    #[error("corrupt changelog at byte {offset}: {reason}")]
    CorruptLog {
        /// Byte offset of the record within the changelog stream
        offset: u64,
        /// Description of the corruption
        reason: String,
    },

    /// A value cannot be text-encoded or decoded
    #[error("codec error: {reason}")]
    Codec {
        /// Description of the rejected input
        reason: String,
    },
}

impl MapError {
    /// Create a corrupt-state error.
    pub fn corrupt_state(reason: impl Into<String>) -> Self {
        Self::CorruptState {
            reason: reason.into(),
        }
    }

    /// Create a codec error.
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }
}

/// Result type alias for map operations
pub type MapResult<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_failed_is_distinguished() {
        let err = StoreError::PredicateFailed {
            attr: "epoch".to_string(),
        };
        assert!(err.is_predicate_failed());
        assert!(!StoreError::backend("boom").is_predicate_failed());
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound {
            obj_id: "/map/files/c1".to_string(),
        };
        assert!(err.is_not_found());
        assert!(format!("{}", err).contains("/map/files/c1"));
    }

    #[test]
    fn test_store_error_converts_to_io() {
        let err: MapError = StoreError::backend("connection reset").into();
        assert!(matches!(err, MapError::Io(StoreError::Backend { .. })));
    }

    #[test]
    fn test_corrupt_log_display_carries_offset() {
        let err = MapError::CorruptLog {
            offset: 42,
            reason: "truncated record".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("42"));
        assert!(display.contains("truncated record"));
    }
}
