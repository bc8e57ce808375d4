//! Error taxonomy shared by both wheel implementations.
//!
//! Propagation policy (see the scheduling design doc): only
//! [`Error::InvalidArgument`] and [`Error::StoreUnavailable`] are ever
//! returned from a public `add`/`remove` call. The remaining variants
//! are constructed purely for structured logging at the point of
//! failure and are never propagated further.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A task admission violated a precondition (e.g. empty `msg`/`type`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store failed a call (connection, timeout, protocol).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A record read back from the store could not be decoded.
    #[error("failed to deserialize task record: {0}")]
    DeserializationFailure(String),

    /// A user-supplied handler returned an error or panicked.
    #[error("handler failed for task {key}: {reason}")]
    HandlerFailure { key: String, reason: String },

    /// Best-effort marker for operations attempted after `Stop()`.
    #[error("scheduler has been stopped")]
    SchedulerStopped,
}
