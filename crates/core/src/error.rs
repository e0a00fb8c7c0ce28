/// Domain-level error taxonomy shared by the store and both network
/// surfaces.
///
/// Every fallible store operation returns one of these variants; the API
/// layer maps them onto HTTP statuses and stable error codes.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The referenced entity does not exist.
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The request payload failed validation (bad extension, size,
    /// malformed identifier, ...).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The task queue is at its configured capacity limit.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// A state-machine precondition was violated: stale confirmation,
    /// mismatched owner, double claim, or a transition out of a terminal
    /// state. Never silently swallowed -- the caller must observe it.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A referenced file exists logically but its bytes are not fully
    /// published yet. Retry-able; surfaced after the bounded wait expires.
    #[error("File not ready: {0}")]
    FileNotReady(String),

    /// An unexpected internal failure (I/O on the exchange directory etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}
