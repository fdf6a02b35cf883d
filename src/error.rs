use std::io;

use thiserror::Error;

/// Every failure the library can surface, spanning codec, connection and
/// pool layers. Lifecycle variants (`QueueFull`, `NotConnected`,
/// `ChangingState`, `BackendUnhealthy`) are retryable at the layer above
/// the one that produced them; the rest land with the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{key:?} is an invalid key for memcache")]
    InvalidKey { key: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{op}: unable to parse {flag:?} token {token:?} as a number")]
    InvalidToken {
        op: &'static str,
        flag: char,
        token: String,
    },

    #[error("{op}: unable to parse value size token {token:?}")]
    InvalidValueSize { op: &'static str, token: String },

    #[error("expected byte {expected:#04x} on the wire but read {actual:#04x}")]
    UnexpectedByte { expected: u8, actual: u8 },

    #[error("expected VERSION prefix in response")]
    NonVersionResponse,

    #[error("[ExpectedOpaque={expected}] [ActualOpaque={actual}] [Operation={op}]")]
    OpaqueMismatch {
        expected: u64,
        actual: u64,
        op: &'static str,
    },

    #[error("outbound queue is full and cannot instantly accept a new link")]
    QueueFull,

    #[error("cannot append link, connection is in {state} state, not connected")]
    NotConnected { state: &'static str },

    #[error("failed to acquire lock as the connection is changing state")]
    ChangingState,

    #[error("backend={backend} attempts={attempts}: connection to backend is unhealthy")]
    BackendUnhealthy { backend: String, attempts: u64 },

    #[error("empty connection pool")]
    EmptyPool,

    #[error("exhausted entire connection pool trying to submit link")]
    PoolExhausted,

    #[error("hash function returned an index outside the range [0, {len}); got {index}")]
    HashOutOfRange { index: usize, len: usize },

    #[error("{backend} backend not found in the pool")]
    BackendNotFound { backend: String },

    #[error("link was pending in the outbound queue but the connection went down before encoding")]
    ZombieOnEncoder,

    #[error("link was pending in the inbound queue but the connection went down before decoding")]
    ZombieOnDecoder,

    #[error("timed out dialing {backend}")]
    DialTimeout { backend: String },

    #[error("link was dropped before it was completed")]
    CompletionDropped,

    /// Every member failure of a list-wide close, joined into one error.
    #[error("{}", join_errors(.0))]
    CloseFailed(Vec<Error>),
}

fn join_errors(errs: &[Error]) -> String {
    errs.iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, Error>;
