//! Error kinds of the record layer.
//!
//! Unless stated otherwise an error is non-corrupting: the context state is
//! preserved and the failing call can be retried once the condition is
//! resolved. Fatal errors poison the context; dropping it is the only legal
//! continuation.

use thiserror::Error;

/// Record layer errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The transport has insufficient incoming data. Retry.
    #[error("transport has no incoming data available")]
    WantRead,

    /// The transport cannot accept outgoing data yet. Retry.
    #[error("transport cannot accept outgoing data")]
    WantWrite,

    /// Malformed header, disallowed content type, unknown epoch, length out
    /// of range, failed authentication in stream mode, or a content stream
    /// colliding with an active one. Fatal.
    #[error("invalid record")]
    InvalidRecord,

    /// Record authentication failed. In datagram mode the record is dropped
    /// silently while below the bad-MAC limit.
    #[error("record authentication failed")]
    AuthFailed,

    /// API misuse: bad content type, duplicate type registration, unknown
    /// epoch, permission change colliding with active use.
    #[error("invalid argument")]
    InvalidArgs,

    /// The operation does not fit the current abstract state, e.g. a
    /// read-done with no read in progress.
    #[error("operation not possible in the current state")]
    UnexpectedOperation,

    /// The epoch window is saturated; retire epochs first.
    #[error("epoch window exceeded")]
    TooManyEpochs,

    /// The epoch id is outside the live window.
    #[error("epoch outside the live window")]
    InvalidEpoch,

    /// A pausable content type was interrupted without an accumulator able
    /// to back up the unfinished message. Fatal.
    #[error("no accumulator available for pausing")]
    NeedsAccumulator,

    /// A record sequence number overflowed.
    #[error("record sequence number wrapped")]
    CounterWrap,

    /// The transport cannot ever provide a buffer large enough for a
    /// non-empty record. Configuration error.
    #[error("transport buffer too small for a record")]
    BufferTooSmall,

    /// A read request crossed the end of the current datagram.
    #[error("request exceeds datagram bounds")]
    OutOfBounds,

    /// An internal invariant failed.
    #[error("internal error")]
    Internal,

    /// A reader/writer error surfacing at the layer boundary.
    #[error(transparent)]
    Buffer(#[from] strata_buf::Error),
}
