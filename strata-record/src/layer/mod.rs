//! The record layer context and its epoch maintenance.
//!
//! [`RecordLayer`] owns the transport, both reader slots, the writer, the
//! epoch window, and the storage that makes pausing (read side) and
//! queueing (write side) possible. The read and write state machines live
//! in the sibling modules.

mod read;
mod write;

#[cfg(test)]
mod tests;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use bytes::BytesMut;
use strata_buf::{Reader, Writer};

use crate::config::Config;
use crate::epoch::{EpochUsage, EpochWindow, Permissions, SeqNumbers, EPOCH_LIMIT, EPOCH_WINDOW};
use crate::error::Error;
use crate::transform::Transform;
use crate::transport::TransportBuffers;
use crate::types::{ContentType, EpochId, TransportMode};

/// Handle to the pending incoming data, returned by
/// [`RecordLayer::read_start`].
pub struct ReadHandle<'a> {
    /// Content type of the incoming data stream.
    pub ty: ContentType,
    /// Epoch protecting it.
    pub epoch: EpochId,
    /// Reader over the decrypted payload.
    pub reader: &'a mut Reader,
}

/// An incoming data stream: content type, epoch, and the reader holding its
/// decrypted bytes.
pub(crate) struct InStream {
    pub(crate) ty: ContentType,
    pub(crate) epoch: EpochId,
    pub(crate) rd: Reader,
}

/// Position of the active reader slot in its lifecycle.
pub(crate) enum ActiveReader {
    /// No incoming record is open.
    None,
    /// A record is open but not handed to the user (either freshly fetched
    /// or partially consumed and re-entered).
    Internal(InStream),
    /// The reader is in the user's hands.
    External(InStream),
}

pub(crate) struct IncomingState {
    pub(crate) active: ActiveReader,
    /// A stream whose unfinished message is held back until the next record
    /// of its content type arrives. Its content type never equals the
    /// active stream's.
    pub(crate) paused: Option<InStream>,
    /// Accumulator storage, moved into the reader of a pausable stream and
    /// recovered when that stream closes.
    pub(crate) spare_acc: Option<Vec<u8>>,
    /// Records with bad MAC seen so far (datagram mode).
    pub(crate) bad_mac_ctr: u64,
}

/// Position of the outgoing writer in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteState {
    /// No outgoing record is open.
    Unset,
    /// No record buffer is attached, but committed data waits in the queue.
    Queueing,
    /// A record is open but not handed to the user.
    Internal,
    /// The writer is in the user's hands.
    External,
}

pub(crate) struct OutgoingState {
    pub(crate) state: WriteState,
    /// Content type of the open or queueing record; meaningful unless the
    /// state is `Unset`.
    pub(crate) ty: ContentType,
    pub(crate) epoch: EpochId,
    pub(crate) writer: Writer,
    /// Queue storage, moved into the writer for pausable content types and
    /// recovered when the record closes without queued data.
    pub(crate) spare_queue: Option<Vec<u8>>,
    /// All dispatched data must reach the transport before the next write.
    pub(crate) flush: bool,
    /// The transport itself must be flushed before a new record buffer can
    /// be prepared.
    pub(crate) clearing: bool,
    /// Header buffer of the open record.
    pub(crate) hdr: Option<BytesMut>,
    /// Work buffer region in front of the plaintext (pre-expansion).
    pub(crate) pre: Option<BytesMut>,
    /// Plaintext region; moved into the writer while the record is open.
    pub(crate) content: Option<BytesMut>,
    /// Work buffer region behind the plaintext (post-expansion and slack).
    pub(crate) post: Option<BytesMut>,
    /// Plaintext offset inside the reassembled work buffer.
    pub(crate) data_offset: usize,
    /// Plaintext length, fixed when the writer releases the record.
    pub(crate) data_len: usize,
}

/// A (D)TLS record layer instance for one connection direction-pair.
pub struct RecordLayer<T: TransportBuffers> {
    pub(crate) cfg: Config,
    pub(crate) transport: T,
    pub(crate) epochs: EpochWindow,
    pub(crate) out: OutgoingState,
    pub(crate) inc: IncomingState,
}

impl<T: TransportBuffers> RecordLayer<T> {
    /// Creates a record layer over `transport`.
    ///
    /// `max_read` bounds the largest paused incoming message, `max_write`
    /// the largest queued outgoing one; both are stream-mode concerns and
    /// a value of 0 disables the respective buffer.
    pub fn new(transport: T, cfg: Config, max_read: usize, max_write: usize) -> Self {
        let stream = cfg.mode == TransportMode::Stream;
        let spare_acc = (stream && max_read > 0).then(|| vec![0u8; max_read]);
        let spare_queue = (stream && max_write > 0).then(|| vec![0u8; max_write]);
        let mode = cfg.mode;
        RecordLayer {
            cfg,
            transport,
            epochs: EpochWindow::new(mode),
            out: OutgoingState {
                state: WriteState::Unset,
                ty: ContentType(0),
                epoch: 0,
                writer: Writer::new(None),
                spare_queue,
                flush: false,
                clearing: false,
                hdr: None,
                pre: None,
                content: None,
                post: None,
                data_offset: 0,
                data_len: 0,
            },
            inc: IncomingState {
                active: ActiveReader::None,
                paused: None,
                spare_acc,
                bad_mac_ctr: 0,
            },
        }
    }

    /// Access to the transport, e.g. to drive its event loop side.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ========================================================================
    // Epoch API
    // ========================================================================

    /// Registers keying material as a new epoch and returns its id.
    ///
    /// Ownership of `transform` moves into the record layer; `None` stands
    /// for the identity protection of the initial epoch. The epoch carries
    /// no permissions until [`RecordLayer::epoch_usage`] grants some.
    pub fn epoch_add(
        &mut self,
        transform: Option<Box<dyn Transform>>,
    ) -> Result<EpochId, Error> {
        if self.epochs.is_full() {
            // Try to retire unused epochs before giving up.
            self.epoch_cleanup()?;
        }
        let id = self.epochs.add(transform)?;
        tracing::debug!(epoch = id, "epoch added");
        Ok(id)
    }

    /// Changes the read/write permissions of an epoch.
    ///
    /// Removing a permission is refused with [`Error::InvalidArgs`] while
    /// the epoch is pinned by an open read or write; an internally open
    /// outgoing record is dispatched to let go of it.
    pub fn epoch_usage(&mut self, epoch: EpochId, usage: EpochUsage) -> Result<(), Error> {
        let offset = self.epochs.offset_of(epoch)?;

        let (remove_read, remove_write) = match self.cfg.mode {
            TransportMode::Stream => {
                // Granting a default to a new epoch implicitly takes it from
                // the previous holder.
                let rr = if usage.can_read() {
                    self.epochs.default_in_epoch().filter(|&e| e != epoch)
                } else {
                    None
                };
                let rw = if usage.can_write() {
                    self.epochs.default_out_epoch().filter(|&e| e != epoch)
                } else {
                    None
                };
                (rr, rw)
            }
            TransportMode::Datagram => {
                let removed = self.epochs.usage_at(offset).removed_by(usage);
                (
                    removed.can_read().then_some(epoch),
                    removed.can_write().then_some(epoch),
                )
            }
        };

        if let Some(e) = remove_read {
            self.check_remove_read(e)?;
        }
        if let Some(e) = remove_write {
            self.check_remove_write(e)?;
        }

        // Dispatching an open record above may have slid the window.
        let offset = self.epochs.offset_of(epoch)?;
        self.epochs.apply_usage(offset, usage);
        self.epoch_cleanup()
    }

    /// Forces the sequence number of the next outgoing record.
    ///
    /// Datagram-only: RFC 6347 requires a HelloVerifyRequest to reuse the
    /// sequence number of the ClientHello it answers.
    pub fn force_next_sequence_number(
        &mut self,
        epoch: EpochId,
        seq: u64,
    ) -> Result<(), Error> {
        if self.cfg.mode != TransportMode::Datagram {
            return Err(Error::UnexpectedOperation);
        }
        let slot = self.epochs.slot_mut(epoch)?;
        match &mut slot.seq {
            SeqNumbers::Datagram { next_out, .. } => {
                *next_out = seq;
                Ok(())
            }
            SeqNumbers::Stream { .. } => Err(Error::Internal),
        }
    }

    /// Sequence number of the last valid incoming record of an epoch.
    ///
    /// Datagram-only; the counterpart of
    /// [`RecordLayer::force_next_sequence_number`].
    pub fn last_sequence_number(&self, epoch: EpochId) -> Result<u64, Error> {
        if self.cfg.mode != TransportMode::Datagram {
            return Err(Error::UnexpectedOperation);
        }
        let slot = self.epochs.slot(epoch)?;
        match &slot.seq {
            SeqNumbers::Datagram { last_seen, .. } => Ok(*last_seen),
            SeqNumbers::Stream { .. } => Err(Error::Internal),
        }
    }

    // ========================================================================
    // Epoch maintenance
    // ========================================================================

    /// Checks that `epoch` is live and grants `usage`.
    pub(crate) fn check_epoch(&self, epoch: EpochId, usage: EpochUsage) -> Result<(), Error> {
        let offset = self.epochs.offset_of(epoch)?;
        if self.epochs.allows(offset, usage) {
            Ok(())
        } else {
            Err(Error::InvalidRecord)
        }
    }

    /// Refuses read-permission removal while a reader still uses the epoch.
    fn check_remove_read(&self, epoch: EpochId) -> Result<(), Error> {
        if let ActiveReader::External(s) = &self.inc.active {
            if s.epoch == epoch {
                return Err(Error::InvalidArgs);
            }
        }
        if let Some(p) = &self.inc.paused {
            if p.epoch == epoch {
                return Err(Error::InvalidArgs);
            }
        }
        // An internally open record is allowed: the next read_start will
        // re-check the epoch and fail there. This catches a peer that
        // piggy-backs data of the next epoch onto a record of the old one.
        Ok(())
    }

    /// Refuses write-permission removal while the user holds the writer;
    /// dispatches an internally open record so the epoch can go.
    fn check_remove_write(&mut self, epoch: EpochId) -> Result<(), Error> {
        if self.out.state == WriteState::Unset || self.out.epoch != epoch {
            return Ok(());
        }
        match self.out.state {
            WriteState::External => Err(Error::InvalidArgs),
            WriteState::Internal => self.release_and_dispatch(true),
            _ => Ok(()),
        }
    }

    /// Retires epochs that nothing uses any more and slides the window.
    ///
    /// An epoch is needed while it has permissions, or (stream mode) while
    /// queued outgoing data of that epoch awaits dispatch.
    pub(crate) fn epoch_cleanup(&mut self) -> Result<(), Error> {
        let mut shift = 0;
        for off in 0..self.epochs.next {
            let needed = match &self.epochs.perms {
                Permissions::Stream {
                    default_in,
                    default_out,
                } => {
                    *default_in == Some(off as u8)
                        || *default_out == Some(off as u8)
                        || (self.out.state == WriteState::Queueing
                            && self.out.epoch as usize == self.epochs.base + off)
                }
                Permissions::Datagram(bits) => !bits[off].is_empty(),
            };
            if needed {
                break;
            }
            shift += 1;
        }
        if shift == 0 {
            return Ok(());
        }
        let max_shift = EPOCH_LIMIT - (self.epochs.base + EPOCH_WINDOW);
        self.epochs.shift(shift.min(max_shift));
        Ok(())
    }
}
