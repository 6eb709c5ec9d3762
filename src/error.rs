//! Crate-wide error type for OmniStack.
//!
//! The hot path (packet allocation, channel read/write, filter evaluation,
//! routing) never uses this type — it reports failure as `None`/`bool`/a
//! status code instead. `OmniError` is reserved for initialization and
//! control-plane paths.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OmniError {
    /// A memory pool, named region, or thread/process table is full.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A bad header, checksum, or otherwise malformed packet on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Violated an initialization-time contract (duplicate module name,
    /// node already in hashtable, mismatched socket family, ...).
    #[error("contract violation: {0}")]
    Contract(String),

    /// The peer side of a control-plane connection closed.
    #[error("peer closed")]
    PeerClosed,

    /// A control-plane RPC failed with the given status.
    #[error("control plane error: {0}")]
    Control(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type OmniResult<T> = Result<T, OmniError>;

impl From<String> for OmniError {
    fn from(s: String) -> Self {
        OmniError::Contract(s)
    }
}

impl From<&str> for OmniError {
    fn from(s: &str) -> Self {
        OmniError::Contract(s.to_string())
    }
}
