//! The lower buffering layer.
//!
//! The record layer never performs I/O itself; it consumes contiguous
//! whole-record buffers from an implementation of [`TransportBuffers`] and
//! dispatches finished records back into it. Implementations sit on top of
//! a stream socket (TLS), a datagram socket (DTLS), or anything test-shaped.

use bytes::BytesMut;

use crate::error::Error;

/// Buffer supplier and sink underneath the record layer.
///
/// ## Read side
///
/// [`fetch`](TransportBuffers::fetch) is a peek: it exposes the first `len`
/// unconsumed bytes without consuming them and may be re-issued with a
/// larger `len` as header parsing reveals the record length.
/// [`take`](TransportBuffers::take) then transfers ownership of those bytes
/// to the caller. In datagram mode both operate within the current datagram
/// only; a request crossing its end fails with [`Error::OutOfBounds`], and
/// [`skip`](TransportBuffers::skip) discards whatever remains of it.
///
/// ## Write side
///
/// [`alloc_out`](TransportBuffers::alloc_out) hands out a writable buffer
/// (possibly larger than `min`, possibly smaller — the record layer checks
/// and aborts via [`abort_out`](TransportBuffers::abort_out) if it cannot
/// fit a record). [`dispatch`](TransportBuffers::dispatch) commits a
/// finished record for transmission; [`flush`](TransportBuffers::flush)
/// pushes all dispatched bytes to the wire. The transport must transmit
/// whole dispatched records or nothing — no partial transmissions.
pub trait TransportBuffers {
    /// Exposes the next `len` unconsumed bytes.
    ///
    /// Fails with [`Error::WantRead`] while the data has not arrived, or
    /// with [`Error::OutOfBounds`] when the current datagram is shorter
    /// than `len`.
    fn fetch(&mut self, len: usize) -> Result<&[u8], Error>;

    /// Consumes the next `len` bytes, transferring ownership.
    ///
    /// Only issued after a successful `fetch(len)`.
    fn take(&mut self, len: usize) -> Result<BytesMut, Error>;

    /// Discards the remainder of the current datagram. No-op on streams.
    fn skip(&mut self);

    /// Provides a writable buffer of preferably at least `min` bytes.
    fn alloc_out(&mut self, min: usize) -> Result<BytesMut, Error>;

    /// Commits a finished record for transmission.
    fn dispatch(&mut self, record: BytesMut) -> Result<(), Error>;

    /// Returns a buffer obtained from [`alloc_out`](Self::alloc_out)
    /// without dispatching anything.
    fn abort_out(&mut self, buf: BytesMut);

    /// Bytes dispatched but not yet flushed to the wire.
    fn pending(&self) -> usize;

    /// Pushes all dispatched bytes to the wire.
    ///
    /// Fails with [`Error::WantWrite`] while the wire cannot take them;
    /// retry until it succeeds.
    fn flush(&mut self) -> Result<(), Error>;
}
