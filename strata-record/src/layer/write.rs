//! The outgoing half of the record layer.
//!
//! An outgoing record buffer obtained from the transport is dissected into
//! header, pre-expansion, plaintext and post-expansion sub-spans. The
//! plaintext span is moved into the user-facing writer; at dispatch the
//! spans are rejoined, the payload protected in place, and the header
//! written once the ciphertext length is known.
//!
//! ```text
//! +--------+-----------------------------------------------+
//! |        |        +------------------------+             |
//! | header |  pre   | plaintext / ciphertext |  post/slack |
//! |        |        +------------------------+             |
//! +--------+-----------------------------------------------+
//! ```
//!
//! The `flush` flag records that everything dispatched by the user must
//! reach the transport before writing continues; `clearing` records that
//! the transport itself still has to be flushed. Splitting the two keeps
//! the user in control of which calls touch the underlying transport.

use core::mem;

use strata_buf::{Feed, Writer};

use super::{RecordLayer, WriteState};
use crate::error::Error;
use crate::record;
use crate::transform::{PayloadBuf, Record};
use crate::transport::TransportBuffers;
use crate::types::{ContentType, EpochId, ProtocolVersion};
use crate::epoch::EpochUsage;

impl<T: TransportBuffers> RecordLayer<T> {
    /// Opens a record of the given content type and epoch and hands out a
    /// writer for its payload.
    ///
    /// Successive calls for a mergeable type extend the record still open
    /// from the previous write; a type or epoch change dispatches it first.
    pub fn write_start(
        &mut self,
        ty: ContentType,
        epoch: EpochId,
    ) -> Result<&mut Writer, Error> {
        // Invariant: the flush and clearing flags are only ever raised while
        // no write is in progress (write_flush refuses an external writer,
        // and clear_pending lowers them before any state can become
        // External again). Checking the abstract state and the arguments
        // first therefore cannot skip a pending flush obligation, and it
        // keeps API misuse from touching the transport.
        if self.out.state == WriteState::External {
            if cfg!(feature = "state-validation") {
                return Err(Error::UnexpectedOperation);
            }
            debug_assert!(false, "write_start while a write is in progress");
        }

        if !self.cfg.is_valid_type(ty) {
            return Err(Error::InvalidArgs);
        }
        self.check_epoch(epoch, EpochUsage::WRITE)?;

        // Drain queued data and satisfy a requested flush before anything
        // new is written.
        self.clear_pending()?;

        if self.out.state == WriteState::Internal {
            if self.out.ty == ty && self.out.epoch == epoch {
                tracing::trace!(ty = ty.0, epoch, "extending the open record");
                self.out.state = WriteState::External;
                return Ok(&mut self.out.writer);
            }
            // The open record belongs to another stream; send it on its way.
            self.release_and_dispatch(true)?;
        }

        self.prepare_record(epoch)?;
        self.out.ty = ty;
        self.out.epoch = epoch;
        self.track_record()?;
        self.out.state = WriteState::External;
        Ok(&mut self.out.writer)
    }

    /// Finalizes the write opened by [`RecordLayer::write_start`].
    ///
    /// The record is not necessarily dispatched yet: mergeable types keep
    /// it open for follow-up messages, and delivery to the wire needs
    /// [`RecordLayer::write_flush`].
    pub fn write_done(&mut self) -> Result<(), Error> {
        if self.out.state != WriteState::External {
            if cfg!(feature = "state-validation") {
                return Err(Error::UnexpectedOperation);
            }
            debug_assert!(false, "write_done without a write in progress");
        }
        self.out.state = WriteState::Internal;
        self.release_and_dispatch(false)
    }

    /// Requests that everything dispatched so far reaches the transport.
    ///
    /// May fail with [`Error::WantWrite`]; retrying resumes where it left
    /// off.
    pub fn write_flush(&mut self) -> Result<(), Error> {
        if self.out.state == WriteState::External {
            if cfg!(feature = "state-validation") {
                return Err(Error::UnexpectedOperation);
            }
            debug_assert!(false, "write_flush while a write is in progress");
        }
        self.out.flush = true;
        self.clear_pending()
    }

    // ========================================================================
    // Record lifecycle
    // ========================================================================

    /// Dispatches queued writer data into fresh records and performs the
    /// transport flush demanded by the `flush`/`clearing` flags.
    pub(crate) fn clear_pending(&mut self) -> Result<(), Error> {
        if self.out.clearing {
            self.transport.flush()?;
            self.out.clearing = false;
        }

        // Each iteration consumes queue data, so the loop terminates.
        while self.out.state == WriteState::Queueing {
            tracing::trace!("draining queued record data");
            let epoch = self.out.epoch;
            self.prepare_record(epoch)?;
            let Some(content) = self.out.content.take() else {
                return Err(Error::Internal);
            };
            match self.out.writer.feed(content)? {
                Feed::Open => {
                    self.out.state = WriteState::Internal;
                }
                Feed::Filled(buf) => {
                    // The record is nothing but queued data; send it and
                    // keep draining.
                    self.out.data_len = buf.len();
                    self.out.content = Some(buf);
                    self.dispatch_record()?;
                }
            }
        }

        if self.out.flush {
            if self.out.state == WriteState::Internal {
                self.release_and_dispatch(true)?;
            }
            self.out.clearing = true;
            self.out.flush = false;
        }

        if self.out.clearing {
            self.transport.flush()?;
            self.out.clearing = false;
        }
        Ok(())
    }

    /// Obtains a record buffer from the transport and dissects it.
    fn prepare_record(&mut self, epoch: EpochId) -> Result<(), Error> {
        let hdr_len = record::header_len(self.cfg.mode);
        let (pre, post) = self.epochs.slot(epoch)?.expansion();

        let min = hdr_len + pre + post + 1;
        let mut work = self.transport.alloc_out(min)?;
        if work.len() < min {
            // Cannot fit even a 1-byte record. Flush what the transport has
            // and retry; if it has nothing, no buffer will ever be larger.
            let pending = self.transport.pending();
            self.transport.abort_out(work);
            if pending == 0 {
                return Err(Error::BufferTooSmall);
            }
            self.out.clearing = true;
            return Err(Error::WantWrite);
        }

        self.out.hdr = Some(work.split_to(hdr_len));
        self.out.pre = Some(work.split_to(pre));
        let content_len = (work.len() - post).min(self.cfg.max_plain_out);
        let tail = work.split_off(content_len);
        self.out.content = Some(work);
        self.out.post = Some(tail);
        self.out.data_offset = pre;
        self.out.data_len = 0;
        Ok(())
    }

    /// Binds the prepared plaintext region to the writer.
    fn track_record(&mut self) -> Result<(), Error> {
        if self.out.state == WriteState::Unset {
            // Hand the queue to the writer only for pausable content.
            let queue = if self.cfg.can_pause(self.out.ty) {
                self.out.spare_queue.take()
            } else {
                None
            };
            let old = mem::replace(&mut self.out.writer, Writer::new(queue));
            if let Some(q) = old.into_queue() {
                self.out.spare_queue = Some(q);
            }
        }
        let Some(content) = self.out.content.take() else {
            return Err(Error::Internal);
        };
        match self.out.writer.feed(content)? {
            Feed::Open => {
                self.out.state = WriteState::Internal;
                Ok(())
            }
            Feed::Filled(buf) => {
                // Only reachable with queue data pending, which
                // clear_pending has ruled out by now.
                self.out.content = Some(buf);
                Err(Error::Internal)
            }
        }
    }

    /// Detaches the record buffer from the writer.
    ///
    /// Returns `false` when the record is kept open so that further
    /// messages of the same mergeable type can extend it.
    fn release_record(&mut self, force: bool) -> Result<bool, Error> {
        let reclaimed = match self.out.writer.reclaim(force) {
            Ok(r) => r,
            Err(strata_buf::Error::DataLeft) if !force && self.cfg.can_merge(self.out.ty) => {
                tracing::trace!(
                    ty = self.out.ty.0,
                    "record kept open for merging further messages"
                );
                self.out.state = WriteState::Internal;
                return Ok(false);
            }
            Err(strata_buf::Error::DataLeft) => self.out.writer.reclaim(true)?,
            Err(e) => return Err(e.into()),
        };

        self.out.data_len = reclaimed.written;
        self.out.content = Some(reclaimed.out);

        if reclaimed.queued > 0 {
            // Overflow can only come from a queue, and only pausable types
            // get one.
            if !self.cfg.can_pause(self.out.ty) {
                return Err(Error::Internal);
            }
            tracing::debug!(queued = reclaimed.queued, "outgoing data queued");
            self.out.state = WriteState::Queueing;
        } else {
            let old = mem::replace(&mut self.out.writer, Writer::new(None));
            if let Some(q) = old.into_queue() {
                self.out.spare_queue = Some(q);
            }
            self.out.state = WriteState::Unset;
        }
        Ok(true)
    }

    pub(crate) fn release_and_dispatch(&mut self, force: bool) -> Result<(), Error> {
        if self.release_record(force)? {
            self.dispatch_record()?;
        }
        Ok(())
    }

    /// Protects the record payload and commits the finished record to the
    /// transport.
    ///
    /// Empty records of a type that does not allow them are silently
    /// abandoned.
    pub(crate) fn dispatch_record(&mut self) -> Result<(), Error> {
        let (Some(hdr), Some(pre), Some(content), Some(post)) = (
            self.out.hdr.take(),
            self.out.pre.take(),
            self.out.content.take(),
            self.out.post.take(),
        ) else {
            return Err(Error::Internal);
        };

        let ty = self.out.ty;
        let epoch = self.out.epoch;

        if self.out.data_len == 0 && !self.cfg.empty_allowed(ty) {
            tracing::debug!(ty = ty.0, "dropping empty record");
            let mut whole = hdr;
            whole.unsplit(pre);
            whole.unsplit(content);
            whole.unsplit(post);
            self.transport.abort_out(whole);
        } else {
            let mut work = pre;
            work.unsplit(content);
            work.unsplit(post);

            let seq = self.epochs.slot_mut(epoch)?.next_out_seq()?;
            let version = self.cfg.version.unwrap_or(ProtocolVersion::TLS1_2);
            let mut rec = Record {
                seq,
                epoch,
                ty,
                version,
                payload: PayloadBuf {
                    buf: work,
                    data_offset: self.out.data_offset,
                    data_len: self.out.data_len,
                },
            };

            let slot = self.epochs.slot_mut(epoch)?;
            if let Some(transform) = slot.transform.as_mut() {
                transform.encrypt(&mut rec, self.cfg.rng.as_deref_mut())?;
            }
            // The pre-expansion offset was chosen so the ciphertext lands
            // flush against the header.
            if rec.payload.data_offset != 0 {
                return Err(Error::Internal);
            }

            let mut hdr = hdr;
            record::write_header(self.cfg.mode, &rec, &mut hdr);

            tracing::debug!(ty = ty.0, epoch, seq, len = rec.payload.data_len, "record dispatched");

            let mut full = hdr;
            let mut payload = rec.payload.buf;
            payload.truncate(rec.payload.data_len);
            full.unsplit(payload);
            self.transport.dispatch(full)?;
        }

        self.out.data_len = 0;
        self.out.data_offset = 0;

        // Epochs may have been held back by the pending record.
        self.epoch_cleanup()
    }
}
