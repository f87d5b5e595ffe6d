use thiserror::Error;

/// Errors returned across the hub boundary.
///
/// Validation failures never mutate server-side state; the caller
/// receives the rule name via `Display` and can decide whether to retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid state change: {0}")]
    InvalidStateChange(String),

    #[error("invalid password")]
    InvalidPassword,

    #[error("caller is not the room host")]
    NotHost,

    #[error("caller has not joined a room")]
    NotJoinedRoom,

    #[error("target user is blocked")]
    UserBlocked,

    #[error("target user does not accept messages")]
    UserBlocksPMs,

    #[error("stale connection")]
    StaleConnection,

    #[error("lock acquisition timed out")]
    Timeout,

    #[error("entity not tracked")]
    NotTracked,
}
