//! Crate-wide error taxonomy.

use thiserror::Error;

/// Errors produced by the document core.
///
/// `StructureError` and `TypeMismatch` indicate a malformed or
/// causally premature remote change; the pack applier logs and skips
/// the offending change. `OutOfRange` and `NotFound` surface from
/// user-facing editing closures. `Unexpected` is an internal
/// invariant violation and should abort the document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A referenced element or node id is unknown to the registry.
    #[error("unknown element or node: {0}")]
    StructureError(String),

    /// An operation targeted an element of the wrong kind.
    #[error("element {0} is not a {1}")]
    TypeMismatch(String, &'static str),

    /// A caller-supplied index does not map to a node.
    #[error("index out of range: {0}")]
    OutOfRange(String),

    /// Absent map key.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Invariant violation; indicates a bug, not a user error.
    #[error("unexpected state: {0}")]
    Unexpected(String),
}
