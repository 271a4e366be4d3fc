//! Domain error types for permission resolution.

use thiserror::Error;

/// Domain-specific errors for node construction, resolution and checks.
///
/// Graph anomalies (inheritance cycles, references to groups that are not
/// loaded) are never reported here; the resolver skips them. Mutation outcomes
/// are reported through [`DataMutateResult`](crate::holder::DataMutateResult).
///
/// The type is `Clone` because a single failed cache computation is handed to
/// every caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The node key is empty or malformed for its family.
    #[error("invalid node key '{key}': {reason}")]
    InvalidNodeKey { key: String, reason: String },

    /// A context pair has an empty key or value.
    #[error("invalid context {key}={value}")]
    InvalidContext { key: String, value: String },

    /// The permission passed to a check is empty.
    #[error("invalid permission: {value:?}")]
    InvalidPermission { value: String },

    /// A meta stack element string could not be parsed.
    #[error("invalid meta stack element: {value}")]
    InvalidStackElement { value: String },

    /// The holder passed to a mutation is not the instance owned by the manager.
    #[error("holder not loaded: {identifier}")]
    HolderNotLoaded { identifier: String },

    /// A synchronous group lookup failed.
    #[error("group lookup failed for '{group}': {message}")]
    LookupFailed { group: String, message: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
