//! Error types for the Tx-Core crate.
//!
//! This module defines a unified error enumeration used across the task
//! graph, claim, run, learning, and anchor subsystems. It integrates with
//! `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - The HTTP boundary maps variants to status codes; storage failures are
//!   sanitized before leaving the process.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Tx-Core library.
///
/// - Used across repositories, services, and the HTTP/stdio boundaries.
/// - Implements `std::error::Error` via `thiserror`.
pub enum TxError {
    /// Task, learning, anchor, run, or worker identifier absent.
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// Illegal field value or malformed identifier.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Status change not present in the transition table.
    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Proposed blocker or parent edge would create a cycle.
    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    /// Deletion blocked by children without cascade.
    #[error("Task {0} has children; pass cascade to delete the subtree")]
    HasChildren(String),

    /// Claim insertion violated the unique-active invariant.
    #[error("Task {0} is already claimed")]
    AlreadyClaimed(String),

    /// Worker pool is at its configured capacity.
    #[error("Worker pool at capacity ({0} alive workers)")]
    PoolAtCapacity(usize),

    /// Optimistic lock failure; caller should reload and retry.
    #[error("Stale data for {0}: row changed since it was read")]
    StaleData(String),

    /// Embedding provider or another required collaborator is offline.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Missing or invalid API credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Lower-level storage failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error from the filesystem or process layer.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TxError {
    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            TxError::NotFound(..) => "not_found",
            TxError::Validation(_) => "validation",
            TxError::IllegalTransition { .. } => "illegal_transition",
            TxError::CircularDependency(_) => "circular_dependency",
            TxError::HasChildren(_) => "has_children",
            TxError::AlreadyClaimed(_) => "already_claimed",
            TxError::PoolAtCapacity(_) => "pool_at_capacity",
            TxError::StaleData(_) => "stale_data",
            TxError::ServiceUnavailable(_) => "service_unavailable",
            TxError::Unauthorized(_) => "unauthorized",
            TxError::Database(_) | TxError::Io(_) | TxError::Serialization(_) => "internal",
        }
    }

    /// Whether the message is safe to surface to clients verbatim.
    ///
    /// Storage and I/O messages may leak schema details and are replaced
    /// with a generic message at the boundary.
    pub fn is_public(&self) -> bool {
        !matches!(
            self,
            TxError::Database(_) | TxError::Io(_) | TxError::Serialization(_)
        )
    }
}

/// Convenience alias used across the crate.
pub type TxResult<T> = Result<T, TxError>;
