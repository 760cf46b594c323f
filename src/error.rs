//! Crate-level error types for persistence, the event store, and grains.

/// Error returned by snapshot loads and version-conditioned writes.
///
/// [`Conflict`](PersistenceError::Conflict) is deliberately a separate
/// variant from [`Io`](PersistenceError::Io): a conflict means a concurrent
/// writer advanced the persisted version and the caller may reload and
/// retry, while an I/O failure is transient and retrying blindly is wrong.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The expected version no longer matches the persisted version.
    ///
    /// The write was rejected and the persisted state is unchanged.
    #[error("version conflict: expected {expected}, found {actual}")]
    Conflict {
        /// The version the caller expected to be persisted.
        expected: u64,
        /// The version actually persisted.
        actual: u64,
    },

    /// Underlying storage I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Whether this error is a version conflict (reload-and-retry is an
    /// option) rather than a storage fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PersistenceError::Conflict { .. })
    }
}

/// Error returned by event store reads, appends, and subscription control.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Underlying storage I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The subscription's type filter pattern is not a valid regex.
    #[error("invalid type filter: {0}")]
    Filter(#[from] regex::Error),
}

/// Error returned when interacting with a grain through its handle.
#[derive(Debug, thiserror::Error)]
pub enum GrainError {
    /// The grain's actor task has exited (idle eviction or displacement).
    ///
    /// The caller should obtain a fresh handle from the store; the next
    /// activation reloads state from the snapshot.
    #[error("grain is no longer active")]
    Gone,

    /// Activation failed while binding to the state store.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
