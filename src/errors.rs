//! Hydro default `Error`
use thiserror::Error;

/// Result type: `std::result::Result<T, Error>`
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapping error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The queue with the given name was closed.
    /// Returned by `send` right away, and by `receive` once
    /// the remaining values have been drained.
    #[error("queue `{0}` is closed")]
    Closed(String),

    /// A timed send or receive on the named queue ran out of time
    #[error("queue `{0}` timed out")]
    Timeout(String),

    /// A receiver with this name is already registered.
    /// The registry is left untouched.
    #[error("receiver `{0}` already exists")]
    DuplicateReceiver(String),

    /// The worker pool was closed and no longer accepts tasks
    #[error("worker pool is closed")]
    PoolClosed,

    /// A worker, courier or dispatch thread could not be spawned
    #[error("failed to spawn thread: {0}")]
    Spawn(String),

    /// `Broadcaster::send` could not push onto the ingress queue
    #[error("broadcaster send failed: {0}")]
    Ingress(#[source] Box<Error>),
}

impl Error {
    /// `true` if this is `Error::Closed`, directly or wrapped in
    /// `Error::Ingress`
    pub fn is_closed(&self) -> bool {
        match self {
            Error::Closed(_) => true,
            Error::Ingress(inner) => inner.is_closed(),
            _ => false,
        }
    }

    /// `true` if this is `Error::Timeout`, directly or wrapped in
    /// `Error::Ingress`
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Ingress(inner) => inner.is_timeout(),
            _ => false,
        }
    }
}
