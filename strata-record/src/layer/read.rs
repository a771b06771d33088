//! The incoming half of the record layer.
//!
//! `read_start` fetches a protected record from the transport, decrypts it
//! through the epoch's transform, and routes the payload into a reader: the
//! paused reader when the record continues an unfinished message of the
//! same content type, a fresh one otherwise. `read_done` releases the
//! record, pausing the stream when a message ran past the record boundary.
//!
//! At most one content type can have a partially consumed message at any
//! instant. Interleaving a second fragmented stream is rejected; this
//! matches what the protocol needs (fragmented handshake interleaved with
//! at most whole records of other types) and keeps the state small.

use core::mem;

use strata_buf::{FeedStatus, Reader};

use super::{ActiveReader, InStream, ReadHandle, RecordLayer};
use crate::epoch::{EpochUsage, SeqNumbers};
use crate::error::Error;
use crate::record;
use crate::transform::{PayloadBuf, Record};
use crate::transport::TransportBuffers;
use crate::types::TransportMode;

impl<T: TransportBuffers> RecordLayer<T> {
    /// Queries for incoming data.
    ///
    /// On success the handle identifies the content type and epoch of the
    /// pending data and exposes the reader over its payload. Not
    /// idempotent: an open read must be finished with
    /// [`RecordLayer::read_done`] first.
    pub fn read_start(&mut self) -> Result<ReadHandle<'_>, Error> {
        if matches!(self.inc.active, ActiveReader::External(_)) {
            if cfg!(feature = "state-validation") {
                return Err(Error::UnexpectedOperation);
            }
            debug_assert!(false, "read_start while a read is in progress");
        }

        if matches!(self.inc.active, ActiveReader::None) {
            self.fetch_into_reader()?;
        }

        // The epoch must be re-checked even when continuing in an already
        // open record: the read permission may have moved to a newer epoch
        // between two piggy-backed handshake messages.
        match mem::replace(&mut self.inc.active, ActiveReader::None) {
            ActiveReader::Internal(stream) => {
                if let Err(e) = self.check_epoch(stream.epoch, EpochUsage::READ) {
                    self.inc.active = ActiveReader::Internal(stream);
                    return Err(e);
                }
                self.inc.active = ActiveReader::External(stream);
            }
            other => {
                self.inc.active = other;
                return Err(Error::Internal);
            }
        }

        match &mut self.inc.active {
            ActiveReader::External(stream) => Ok(ReadHandle {
                ty: stream.ty,
                epoch: stream.epoch,
                reader: &mut stream.rd,
            }),
            _ => Err(Error::Internal),
        }
    }

    /// Releases the record exposed by [`RecordLayer::read_start`].
    ///
    /// Unread data of a mergeable type keeps the record open for the next
    /// `read_start`; an unfinished message of a pausable type is backed up
    /// and resumed when the next record of that type arrives.
    pub fn read_done(&mut self) -> Result<(), Error> {
        let mut stream = match mem::replace(&mut self.inc.active, ActiveReader::None) {
            ActiveReader::External(stream) => stream,
            other => {
                self.inc.active = other;
                if cfg!(feature = "state-validation") {
                    return Err(Error::UnexpectedOperation);
                }
                debug_assert!(false, "read_done without a read in progress");
                return Err(Error::UnexpectedOperation);
            }
        };

        match stream.rd.reclaim() {
            Ok(false) => {
                // Fully processed; the accumulator can serve the next
                // pausable stream.
                if let Some(acc) = stream.rd.into_accumulator() {
                    self.inc.spare_acc = Some(acc);
                }
                Ok(())
            }
            Ok(true) => {
                tracing::debug!(ty = stream.ty.0, "incoming stream paused");
                if self.inc.paused.is_some() {
                    return Err(Error::Internal);
                }
                self.inc.paused = Some(stream);
                Ok(())
            }
            Err(strata_buf::Error::DataLeft) => {
                // More messages in the same record.
                if !self.cfg.can_merge(stream.ty) {
                    return Err(Error::InvalidRecord);
                }
                self.inc.active = ActiveReader::Internal(stream);
                Ok(())
            }
            Err(strata_buf::Error::NeedAccumulator)
            | Err(strata_buf::Error::AccumulatorTooSmall) => {
                if self.cfg.can_pause(stream.ty) {
                    // Pausable type, but no (or too small) backing storage.
                    Err(Error::NeedsAccumulator)
                } else {
                    // A message of an unpausable type ran past the record
                    // boundary.
                    Err(Error::InvalidRecord)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Record intake
    // ========================================================================

    /// Fetches the next record and routes its payload into a reader.
    fn fetch_into_reader(&mut self) -> Result<(), Error> {
        let rec = match self.fetch_record() {
            Ok(rec) => rec,
            Err(e) => return self.reject_record(e),
        };

        self.update_in_counter(rec.epoch, rec.seq)?;

        if rec.payload.data_len == 0 && !self.cfg.empty_allowed(rec.ty) {
            tracing::warn!(ty = rec.ty.0, "empty record of a type that forbids them");
            if self.cfg.mode == TransportMode::Datagram {
                self.transport.skip();
                return Err(Error::WantRead);
            }
            return Err(Error::InvalidRecord);
        }

        tracing::debug!(
            ty = rec.ty.0,
            epoch = rec.epoch,
            seq = rec.seq,
            len = rec.payload.data_len,
            "record accepted"
        );

        let ty = rec.ty;
        let epoch = rec.epoch;
        let plain = rec.payload.into_data();

        // A paused stream of this content type resumes with the new
        // payload.
        if self.inc.paused.as_ref().is_some_and(|p| p.ty == ty) {
            let Some(mut stream) = self.inc.paused.take() else {
                return Err(Error::Internal);
            };
            // The read epoch cannot change while a stream is paused.
            if stream.epoch != epoch {
                return Err(Error::Internal);
            }
            return match stream.rd.feed(plain)? {
                FeedStatus::Accumulating => {
                    // Still not enough for the outstanding request; stay
                    // paused and wait for the next record.
                    self.inc.paused = Some(stream);
                    Err(Error::WantRead)
                }
                FeedStatus::Attached => {
                    tracing::debug!(ty = ty.0, "paused stream resumed");
                    self.inc.active = ActiveReader::Internal(stream);
                    Ok(())
                }
            };
        }

        // Fresh stream. Pausable types get the accumulator, unless a
        // paused stream of another type already holds it; such a stream is
        // still served, it just cannot pause in turn.
        let acc = if self.cfg.can_pause(ty) && self.inc.paused.is_none() {
            self.inc.spare_acc.take()
        } else {
            None
        };
        let mut rd = Reader::new(acc);
        rd.feed(plain)?;
        self.inc.active = ActiveReader::Internal(InStream { ty, epoch, rd });
        Ok(())
    }

    /// Fetches, validates, and decrypts one protected record.
    fn fetch_record(&mut self) -> Result<Record, Error> {
        let hdr_len = record::header_len(self.cfg.mode);
        let wire = {
            // A datagram too short for even a header is malformed.
            let buf = self.transport.fetch(hdr_len).map_err(|e| match e {
                Error::OutOfBounds => Error::InvalidRecord,
                e => e,
            })?;
            record::parse_header(&self.cfg, buf)?
        };

        // Resolve the protecting epoch: explicit in datagram headers,
        // implicit (the default incoming epoch) on streams.
        let (epoch, seq) = match self.cfg.mode {
            TransportMode::Stream => self.stream_in_epoch_and_seq()?,
            TransportMode::Datagram => {
                self.check_epoch(wire.epoch, EpochUsage::READ)
                    .map_err(|e| match e {
                        Error::InvalidEpoch => Error::InvalidRecord,
                        e => e,
                    })?;
                if self.cfg.anti_replay && !self.replay_ok(wire.epoch, wire.seq)? {
                    tracing::debug!(seq = wire.seq, "replayed record");
                    return Err(Error::InvalidRecord);
                }
                (wire.epoch, wire.seq)
            }
        };

        // Bound the ciphertext by the plaintext cap plus what this epoch's
        // transform may add.
        let (pre, post) = self.epochs.slot(epoch)?.expansion();
        if wire.len > self.cfg.max_plain_in + pre + post {
            return Err(Error::InvalidRecord);
        }

        let total = hdr_len + wire.len;
        self.transport.fetch(total).map_err(|e| match e {
            // The record claims more than the datagram holds.
            Error::OutOfBounds => Error::InvalidRecord,
            e => e,
        })?;
        let mut whole = self.transport.take(total)?;
        let body = whole.split_off(hdr_len);

        let mut rec = Record {
            seq,
            epoch,
            ty: wire.ty,
            version: wire.version,
            payload: PayloadBuf {
                buf: body,
                data_offset: 0,
                data_len: wire.len,
            },
        };

        if let Some(transform) = self.epochs.slot_mut(epoch)?.transform.as_mut() {
            transform.decrypt(&mut rec)?;
        }
        if rec.payload.data_len > self.cfg.max_plain_in {
            return Err(Error::InvalidRecord);
        }

        // An unspecified version locks onto the first valid record.
        if self.cfg.version.is_none() {
            tracing::debug!(minor = wire.version.minor, "protocol version adopted");
            self.cfg.version = Some(wire.version);
        }

        Ok(rec)
    }

    /// Handles a record that failed validation or authentication.
    ///
    /// Always returns an error: `WantRead` after a silent drop, or the
    /// fatal condition to surface.
    fn reject_record(&mut self, err: Error) -> Result<(), Error> {
        match self.cfg.mode {
            TransportMode::Datagram => match err {
                Error::InvalidRecord => {
                    tracing::debug!("dropping datagram with invalid record");
                    self.transport.skip();
                    Err(Error::WantRead)
                }
                Error::AuthFailed => {
                    self.inc.bad_mac_ctr += 1;
                    if self.cfg.badmac_limit != 0
                        && self.inc.bad_mac_ctr > self.cfg.badmac_limit
                    {
                        tracing::warn!(
                            limit = self.cfg.badmac_limit,
                            "bad-MAC limit exceeded"
                        );
                        return Err(Error::InvalidRecord);
                    }
                    tracing::debug!(
                        count = self.inc.bad_mac_ctr,
                        "dropping record with bad MAC"
                    );
                    self.transport.skip();
                    Err(Error::WantRead)
                }
                e => Err(e),
            },
            TransportMode::Stream => match err {
                // Early data protected with keys we do not have; tolerated
                // only when configured.
                Error::AuthFailed if self.cfg.discard_unauthenticated => {
                    tracing::debug!("discarding unauthenticated record");
                    Err(Error::WantRead)
                }
                Error::AuthFailed => Err(Error::InvalidRecord),
                e => Err(e),
            },
        }
    }

    /// The implicit epoch and sequence number of the next incoming stream
    /// record.
    fn stream_in_epoch_and_seq(&self) -> Result<(crate::types::EpochId, u64), Error> {
        let epoch = self.epochs.default_in_epoch().ok_or(Error::InvalidEpoch)?;
        let slot = self.epochs.slot(epoch)?;
        match &slot.seq {
            SeqNumbers::Stream { next_in, .. } => Ok((epoch, *next_in)),
            SeqNumbers::Datagram { .. } => Err(Error::Internal),
        }
    }

    fn replay_ok(&self, epoch: crate::types::EpochId, seq: u64) -> Result<bool, Error> {
        let slot = self.epochs.slot(epoch)?;
        match &slot.seq {
            SeqNumbers::Datagram { replay, .. } => Ok(replay.check(seq)),
            SeqNumbers::Stream { .. } => Err(Error::Internal),
        }
    }

    /// Advances the incoming sequence state after a record was accepted.
    fn update_in_counter(&mut self, epoch: crate::types::EpochId, seq: u64) -> Result<(), Error> {
        let anti_replay = self.cfg.anti_replay;
        let slot = self.epochs.slot_mut(epoch)?;
        match &mut slot.seq {
            SeqNumbers::Stream { next_in, .. } => {
                *next_in = seq.checked_add(1).ok_or(Error::CounterWrap)?;
            }
            SeqNumbers::Datagram {
                last_seen, replay, ..
            } => {
                *last_seen = seq;
                if anti_replay {
                    replay.update(seq);
                }
            }
        }
        Ok(())
    }
}
