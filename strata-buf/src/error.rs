//! Error types for the buffering primitives.

use thiserror::Error;

/// Failures of reader/writer operations.
///
/// None of these corrupt the primitive they are returned from: the
/// operation can be retried once the stated condition is resolved.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Not enough data (reader) or space (writer) to serve the request.
    #[error("not enough data available to serve the request")]
    OutOfData,

    /// The current buffer still holds unprocessed data; it cannot be
    /// reclaimed without forcing.
    #[error("unprocessed data left in the current buffer")]
    DataLeft,

    /// Backing up unprocessed data requires an accumulator, and none was
    /// provided at construction.
    #[error("pausing requires an accumulator")]
    NeedAccumulator,

    /// The accumulator cannot hold the data that needs to be backed up
    /// together with the outstanding request.
    #[error("accumulator too small for the pending data")]
    AccumulatorTooSmall,

    /// The operation is not possible in the current state, e.g. feeding a
    /// reader that already manages a fragment.
    #[error("operation not possible in the current state")]
    UnexpectedOperation,

    /// Parameter validation failed.
    #[error("invalid argument")]
    InvalidArgs,
}
