use thiserror::Error;

/// Coordination Store failure taxonomy. Every resilience component catches
/// this at its boundary and fails open rather than propagating it further
/// (§4.2/§4.3) — this type exists so that boundary can log a real cause.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("coordination store operation timed out")]
    Timeout,

    #[error("malformed coordination-store value for key {key}: {reason}")]
    Malformed { key: String, reason: String },
}
