//! End-to-end tests of the record layer over an in-memory transport.
//!
//! ## Coverage
//!
//! 1. **Single records** - fetch, decrypt, hand out, release
//! 2. **Pausing** - handshake messages spanning record boundaries
//! 3. **Replay protection** - RFC 6347 Section 4.1.2.6 window
//! 4. **Bad-MAC tolerance** - silent drops up to the configured limit
//! 5. **Merging** - several messages sharing one outgoing record
//! 6. **Queueing** - outgoing messages spilling across records
//! 7. **Epoch lifecycle** - permissions, sliding, forced sequence numbers

use std::collections::VecDeque;

use bytes::BytesMut;

use super::{RecordLayer, WriteState};
use crate::config::Config;
use crate::epoch::{EpochUsage, SeqNumbers};
use crate::error::Error;
use crate::transform::{Record, Transform};
use crate::transport::TransportBuffers;
use crate::types::{ContentType, ProtocolVersion, TransportMode};

// ============================================================================
// In-memory transport
// ============================================================================

struct MemTransport {
    mode: TransportMode,
    stream_in: BytesMut,
    datagrams: VecDeque<BytesMut>,
    out_cap: usize,
    dispatched: Vec<BytesMut>,
    pending: usize,
    fail_flush: bool,
}

impl MemTransport {
    fn stream() -> Self {
        MemTransport {
            mode: TransportMode::Stream,
            stream_in: BytesMut::new(),
            datagrams: VecDeque::new(),
            out_cap: 1 << 15,
            dispatched: Vec::new(),
            pending: 0,
            fail_flush: false,
        }
    }

    fn datagram() -> Self {
        MemTransport {
            mode: TransportMode::Datagram,
            ..MemTransport::stream()
        }
    }

    fn push_stream(&mut self, bytes: &[u8]) {
        self.stream_in.extend_from_slice(bytes);
    }

    fn push_datagram(&mut self, bytes: &[u8]) {
        self.datagrams.push_back(BytesMut::from(bytes));
    }
}

impl TransportBuffers for MemTransport {
    fn fetch(&mut self, len: usize) -> Result<&[u8], Error> {
        match self.mode {
            TransportMode::Stream => {
                if self.stream_in.len() < len {
                    return Err(Error::WantRead);
                }
                Ok(&self.stream_in[..len])
            }
            TransportMode::Datagram => {
                let Some(front) = self.datagrams.front() else {
                    return Err(Error::WantRead);
                };
                if front.len() < len {
                    return Err(Error::OutOfBounds);
                }
                Ok(&front[..len])
            }
        }
    }

    fn take(&mut self, len: usize) -> Result<BytesMut, Error> {
        match self.mode {
            TransportMode::Stream => {
                if self.stream_in.len() < len {
                    return Err(Error::WantRead);
                }
                Ok(self.stream_in.split_to(len))
            }
            TransportMode::Datagram => {
                let Some(front) = self.datagrams.front_mut() else {
                    return Err(Error::WantRead);
                };
                if front.len() < len {
                    return Err(Error::OutOfBounds);
                }
                let taken = front.split_to(len);
                if front.is_empty() {
                    self.datagrams.pop_front();
                }
                Ok(taken)
            }
        }
    }

    fn skip(&mut self) {
        if self.mode == TransportMode::Datagram {
            self.datagrams.pop_front();
        }
    }

    fn alloc_out(&mut self, _min: usize) -> Result<BytesMut, Error> {
        Ok(BytesMut::zeroed(self.out_cap))
    }

    fn dispatch(&mut self, record: BytesMut) -> Result<(), Error> {
        self.pending += record.len();
        self.dispatched.push(record);
        Ok(())
    }

    fn abort_out(&mut self, _buf: BytesMut) {}

    fn pending(&self) -> usize {
        self.pending
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.fail_flush {
            return Err(Error::WantWrite);
        }
        self.pending = 0;
        Ok(())
    }
}

// ============================================================================
// Mock transforms
// ============================================================================

/// Rejects every incoming record.
struct BadMac;

impl Transform for BadMac {
    fn expansion(&self) -> (usize, usize) {
        (0, 0)
    }

    fn encrypt(
        &mut self,
        _rec: &mut Record,
        _rng: Option<&mut (dyn crate::config::RandomSource + '_)>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn decrypt(&mut self, _rec: &mut Record) -> Result<(), Error> {
        Err(Error::AuthFailed)
    }
}

/// Wraps the payload in marker bytes, exercising pre- and post-expansion.
struct Seal {
    pre: usize,
    post: usize,
}

impl Transform for Seal {
    fn expansion(&self) -> (usize, usize) {
        (self.pre, self.post)
    }

    fn encrypt(
        &mut self,
        rec: &mut Record,
        _rng: Option<&mut (dyn crate::config::RandomSource + '_)>,
    ) -> Result<(), Error> {
        let off = rec.payload.data_offset;
        let len = rec.payload.data_len;
        assert_eq!(off, self.pre);
        for b in &mut rec.payload.buf[..off] {
            *b = 0xEE;
        }
        for b in &mut rec.payload.buf[off + len..off + len + self.post] {
            *b = 0xAD;
        }
        rec.payload.data_offset = 0;
        rec.payload.data_len = off + len + self.post;
        Ok(())
    }

    fn decrypt(&mut self, rec: &mut Record) -> Result<(), Error> {
        let len = rec.payload.data_len;
        if len < self.pre + self.post {
            return Err(Error::AuthFailed);
        }
        let ok = rec.payload.buf[..self.pre].iter().all(|&b| b == 0xEE)
            && rec.payload.buf[len - self.post..len].iter().all(|&b| b == 0xAD);
        if !ok {
            return Err(Error::AuthFailed);
        }
        rec.payload.data_offset = self.pre;
        rec.payload.data_len = len - self.pre - self.post;
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn tls_record(ty: u8, body: &[u8]) -> Vec<u8> {
    let mut rec = vec![ty, 3, 3];
    rec.extend_from_slice(&(body.len() as u16).to_be_bytes());
    rec.extend_from_slice(body);
    rec
}

fn dtls_record(ty: u8, epoch: u16, seq: u64, body: &[u8]) -> Vec<u8> {
    let mut rec = vec![ty, 254, 253];
    rec.extend_from_slice(&epoch.to_be_bytes());
    rec.extend_from_slice(&seq.to_be_bytes()[2..8]);
    rec.extend_from_slice(&(body.len() as u16).to_be_bytes());
    rec.extend_from_slice(body);
    rec
}

fn dtls_wire_seq(rec: &[u8]) -> u64 {
    let mut seq = 0u64;
    for &b in &rec[5..11] {
        seq = seq << 8 | b as u64;
    }
    seq
}

fn stream_layer(cfg: Config) -> RecordLayer<MemTransport> {
    RecordLayer::new(MemTransport::stream(), cfg, 1024, 1024)
}

fn datagram_layer(cfg: Config) -> RecordLayer<MemTransport> {
    RecordLayer::new(MemTransport::datagram(), cfg, 0, 0)
}

fn stream_cfg() -> Config {
    let mut cfg = Config::new(TransportMode::Stream);
    cfg.set_version(ProtocolVersion::TLS1_2);
    cfg.add_type(ContentType::APPLICATION_DATA, false, false, true)
        .unwrap();
    cfg.add_type(ContentType::HANDSHAKE, true, true, false).unwrap();
    cfg.add_type(ContentType::ALERT, false, false, false).unwrap();
    cfg
}

fn datagram_cfg() -> Config {
    let mut cfg = Config::new(TransportMode::Datagram);
    cfg.set_version(ProtocolVersion::DTLS1_2);
    cfg.add_type(ContentType::APPLICATION_DATA, false, false, true)
        .unwrap();
    cfg.add_type(ContentType::HANDSHAKE, false, false, false).unwrap();
    cfg
}

// ============================================================================
// Reading, stream mode
// ============================================================================

mod stream_read {
    use super::*;

    #[test]
    fn single_record() {
        let mut layer = stream_layer(stream_cfg());
        let epoch = layer.epoch_add(None).unwrap();
        assert_eq!(epoch, 0);
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer
            .transport_mut()
            .push_stream(&[0x17, 0x03, 0x03, 0x00, 0x05, b'H', b'E', b'L', b'L', b'O']);

        {
            let handle = layer.read_start().unwrap();
            assert_eq!(handle.ty, ContentType::APPLICATION_DATA);
            assert_eq!(handle.epoch, 0);
            assert_eq!(handle.reader.get(5).unwrap(), b"HELLO");
            handle.reader.commit().unwrap();
        }
        layer.read_done().unwrap();

        // The implicit incoming sequence number advanced.
        match &layer.epochs.slot(0).unwrap().seq {
            SeqNumbers::Stream { next_in, .. } => assert_eq!(*next_in, 1),
            _ => unreachable!(),
        }
        // Nothing else is pending, and the context accepts a new read.
        assert!(matches!(layer.read_start(), Err(Error::WantRead)));
    }

    #[test]
    fn handshake_message_spans_two_records() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer
            .transport_mut()
            .push_stream(&tls_record(0x16, &[0x01, 0x00, 0x00, 0x08]));

        {
            let handle = layer.read_start().unwrap();
            assert_eq!(handle.ty, ContentType::HANDSHAKE);
            // Only 4 of the 12 requested bytes are there.
            assert_eq!(handle.reader.get_up_to(12).unwrap().len(), 4);
        }
        layer.read_done().unwrap();
        assert!(layer.inc.paused.is_some());

        // The continuation record resumes the paused stream.
        layer
            .transport_mut()
            .push_stream(&tls_record(0x16, &[0x41, 0x42, 0x43, 0x44]));
        {
            let handle = layer.read_start().unwrap();
            assert_eq!(
                handle.reader.get(8).unwrap(),
                &[0x01, 0x00, 0x00, 0x08, 0x41, 0x42, 0x43, 0x44]
            );
            handle.reader.commit().unwrap();
        }
        layer.read_done().unwrap();
        assert!(layer.inc.paused.is_none());
        // The accumulator is back in rotation.
        assert!(layer.inc.spare_acc.is_some());
    }

    #[test]
    fn two_messages_in_one_record() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer
            .transport_mut()
            .push_stream(&tls_record(0x16, b"aaaabbbb"));

        {
            let handle = layer.read_start().unwrap();
            assert_eq!(handle.reader.get(4).unwrap(), b"aaaa");
            handle.reader.commit().unwrap();
        }
        // Unread mergeable data keeps the record open.
        layer.read_done().unwrap();

        {
            let handle = layer.read_start().unwrap();
            assert_eq!(handle.ty, ContentType::HANDSHAKE);
            assert_eq!(handle.reader.get(4).unwrap(), b"bbbb");
            handle.reader.commit().unwrap();
        }
        layer.read_done().unwrap();
        // Sequence number advanced once: it was a single record.
        match &layer.epochs.slot(0).unwrap().seq {
            SeqNumbers::Stream { next_in, .. } => assert_eq!(*next_in, 1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn fragmented_unpausable_type_is_fatal() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer.transport_mut().push_stream(&tls_record(0x15, &[1, 2]));
        {
            let handle = layer.read_start().unwrap();
            // Read without committing: the alert is incomplete.
            assert_eq!(handle.reader.get_up_to(4).unwrap().len(), 2);
        }
        assert!(matches!(layer.read_done(), Err(Error::InvalidRecord)));
    }

    #[test]
    fn version_is_adopted_from_the_first_record() {
        let mut cfg = stream_cfg();
        cfg.version = None;
        let mut layer = stream_layer(cfg);
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        // First record is TLS 1.0.
        layer
            .transport_mut()
            .push_stream(&[0x17, 0x03, 0x01, 0x00, 0x01, 0xAB]);
        {
            let handle = layer.read_start().unwrap();
            handle.reader.get(1).unwrap();
            handle.reader.commit().unwrap();
        }
        layer.read_done().unwrap();
        assert_eq!(layer.cfg.version, Some(ProtocolVersion::TLS1_0));

        // A TLS 1.2 record now mismatches.
        layer
            .transport_mut()
            .push_stream(&[0x17, 0x03, 0x03, 0x00, 0x01, 0xAB]);
        assert!(matches!(layer.read_start(), Err(Error::InvalidRecord)));
    }

    #[test]
    fn read_start_twice_is_rejected() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();
        layer.transport_mut().push_stream(&tls_record(0x16, b"xy"));

        layer.read_start().unwrap();
        assert!(matches!(
            layer.read_start(),
            Err(Error::UnexpectedOperation)
        ));
        // Nothing was consumed: the mergeable record stays open internally.
        layer.read_done().unwrap();
        // A second read_done has no external read to finish.
        assert!(matches!(
            layer.read_done(),
            Err(Error::UnexpectedOperation)
        ));
    }
}

// ============================================================================
// Reading, datagram mode
// ============================================================================

mod datagram_read {
    use super::*;

    fn read_one(layer: &mut RecordLayer<MemTransport>) -> Result<Vec<u8>, Error> {
        let data = {
            let handle = layer.read_start()?;
            let data = handle.reader.get_up_to(usize::MAX >> 1)?.to_vec();
            handle.reader.commit().map_err(Error::from)?;
            data
        };
        layer.read_done()?;
        Ok(data)
    }

    #[test]
    fn replay_window_accepts_fresh_and_drops_duplicates() {
        let mut layer = datagram_layer(datagram_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        for seq in [5u64, 7, 6] {
            layer
                .transport_mut()
                .push_datagram(&dtls_record(0x17, 0, seq, &[seq as u8]));
            assert_eq!(read_one(&mut layer).unwrap(), vec![seq as u8]);
        }

        // Replaying sequence 5 drops the datagram silently.
        layer
            .transport_mut()
            .push_datagram(&dtls_record(0x17, 0, 5, &[5]));
        assert!(matches!(layer.read_start(), Err(Error::WantRead)));

        match &layer.epochs.slot(0).unwrap().seq {
            SeqNumbers::Datagram {
                last_seen, replay, ..
            } => {
                assert_eq!(*last_seen, 6);
                assert_eq!(replay.top, 7);
                // Bits for 7, 6, 5.
                assert_eq!(replay.mask, 0b111);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn bad_mac_records_are_tolerated_up_to_the_limit() {
        let mut cfg = datagram_cfg();
        cfg.set_badmac_limit(3);
        let mut layer = datagram_layer(cfg);
        layer.epoch_add(Some(Box::new(BadMac))).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        for seq in 0..4u64 {
            layer
                .transport_mut()
                .push_datagram(&dtls_record(0x17, 0, seq, &[0; 4]));
        }
        // Three corrupted records are dropped silently...
        for _ in 0..3 {
            assert!(matches!(layer.read_start(), Err(Error::WantRead)));
        }
        // ...the fourth is fatal.
        assert!(matches!(layer.read_start(), Err(Error::InvalidRecord)));
    }

    #[test]
    fn unknown_epoch_drops_the_datagram() {
        let mut layer = datagram_layer(datagram_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer
            .transport_mut()
            .push_datagram(&dtls_record(0x17, 7, 0, &[1]));
        assert!(matches!(layer.read_start(), Err(Error::WantRead)));

        // A good record afterwards is still served.
        layer
            .transport_mut()
            .push_datagram(&dtls_record(0x17, 0, 0, &[1]));
        assert_eq!(read_one(&mut layer).unwrap(), vec![1]);
    }

    #[test]
    fn record_longer_than_its_datagram_is_dropped() {
        let mut layer = datagram_layer(datagram_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        let mut runt = dtls_record(0x17, 0, 0, &[1, 2, 3, 4]);
        runt.truncate(runt.len() - 2);
        layer.transport_mut().push_datagram(&runt);
        assert!(matches!(layer.read_start(), Err(Error::WantRead)));
    }

    #[test]
    fn two_records_in_one_datagram() {
        let mut layer = datagram_layer(datagram_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        let mut dgram = dtls_record(0x17, 0, 0, &[1]);
        dgram.extend_from_slice(&dtls_record(0x17, 0, 1, &[2]));
        layer.transport_mut().push_datagram(&dgram);

        assert_eq!(read_one(&mut layer).unwrap(), vec![1]);
        assert_eq!(read_one(&mut layer).unwrap(), vec![2]);
    }
}

// ============================================================================
// Writing
// ============================================================================

mod write {
    use super::*;

    #[test]
    fn consecutive_handshake_messages_merge_into_one_record() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        let wr = layer.write_start(ContentType::HANDSHAKE, 0).unwrap();
        wr.get(10).unwrap().copy_from_slice(&[b'a'; 10]);
        wr.commit().unwrap();
        layer.write_done().unwrap();

        let wr = layer.write_start(ContentType::HANDSHAKE, 0).unwrap();
        wr.get(20).unwrap().copy_from_slice(&[b'b'; 20]);
        wr.commit().unwrap();
        layer.write_done().unwrap();

        layer.write_flush().unwrap();

        let dispatched = &layer.transport.dispatched;
        assert_eq!(dispatched.len(), 1);
        let rec = &dispatched[0];
        assert_eq!(&rec[..5], &[0x16, 0x03, 0x03, 0x00, 30]);
        assert_eq!(&rec[5..15], &[b'a'; 10]);
        assert_eq!(&rec[15..35], &[b'b'; 20]);

        // One record, one sequence number.
        match &layer.epochs.slot(0).unwrap().seq {
            SeqNumbers::Stream { next_out, .. } => assert_eq!(*next_out, 1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn type_change_dispatches_the_open_record() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        let wr = layer.write_start(ContentType::HANDSHAKE, 0).unwrap();
        wr.get(4).unwrap().copy_from_slice(b"hand");
        wr.commit().unwrap();
        layer.write_done().unwrap();

        let wr = layer.write_start(ContentType::APPLICATION_DATA, 0).unwrap();
        wr.get(3).unwrap().copy_from_slice(b"app");
        wr.commit().unwrap();
        layer.write_done().unwrap();
        layer.write_flush().unwrap();

        let dispatched = &layer.transport.dispatched;
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[0][0], 0x16);
        assert_eq!(dispatched[1][0], 0x17);
    }

    #[test]
    fn large_message_spills_into_queued_records() {
        let mut layer = stream_layer(stream_cfg());
        // Room for 32 bytes of plaintext per record.
        layer.transport.out_cap = 5 + 32;
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        let message: Vec<u8> = (0..80u8).collect();
        let wr = layer.write_start(ContentType::HANDSHAKE, 0).unwrap();
        wr.get(80).unwrap().copy_from_slice(&message);
        wr.commit().unwrap();
        layer.write_done().unwrap();
        assert_eq!(layer.out.state, WriteState::Queueing);

        layer.write_flush().unwrap();
        assert_eq!(layer.out.state, WriteState::Unset);

        let dispatched = &layer.transport.dispatched;
        assert_eq!(dispatched.len(), 3);
        let mut reassembled = Vec::new();
        for rec in dispatched {
            assert_eq!(rec[0], 0x16);
            reassembled.extend_from_slice(&rec[5..]);
        }
        assert_eq!(reassembled, message);

        // Three records, three sequence numbers.
        match &layer.epochs.slot(0).unwrap().seq {
            SeqNumbers::Stream { next_out, .. } => assert_eq!(*next_out, 3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_record_request_is_silently_ignored() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer.write_start(ContentType::ALERT, 0).unwrap();
        layer.write_done().unwrap();
        layer.write_flush().unwrap();
        assert!(layer.transport.dispatched.is_empty());
    }

    #[test]
    fn flush_retries_after_want_write() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        let wr = layer.write_start(ContentType::APPLICATION_DATA, 0).unwrap();
        wr.get(3).unwrap().copy_from_slice(b"abc");
        wr.commit().unwrap();
        layer.write_done().unwrap();

        layer.transport.fail_flush = true;
        assert!(matches!(layer.write_flush(), Err(Error::WantWrite)));
        // The record itself went out; only the transport flush is pending.
        assert_eq!(layer.transport.dispatched.len(), 1);

        layer.transport.fail_flush = false;
        layer.write_flush().unwrap();
        assert_eq!(layer.transport.pending(), 0);
    }

    #[test]
    fn write_start_while_external_is_rejected() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer.write_start(ContentType::APPLICATION_DATA, 0).unwrap();
        assert!(matches!(
            layer.write_start(ContentType::APPLICATION_DATA, 0),
            Err(Error::UnexpectedOperation)
        ));
    }

    #[test]
    fn write_to_unwritable_epoch_is_rejected() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ).unwrap();
        assert!(layer.write_start(ContentType::APPLICATION_DATA, 0).is_err());
    }
}

// ============================================================================
// Protected round-trips
// ============================================================================

mod protected {
    use super::*;

    #[test]
    fn seal_roundtrip_through_the_wire() {
        // Writer side.
        let mut out = stream_layer(stream_cfg());
        out.epoch_add(Some(Box::new(Seal { pre: 2, post: 4 }))).unwrap();
        out.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        let wr = out.write_start(ContentType::APPLICATION_DATA, 0).unwrap();
        wr.get(5).unwrap().copy_from_slice(b"HELLO");
        wr.commit().unwrap();
        out.write_done().unwrap();
        out.write_flush().unwrap();

        let wire = out.transport.dispatched[0].clone();
        // type | version | length of 2 + 5 + 4.
        assert_eq!(&wire[..5], &[0x17, 0x03, 0x03, 0x00, 11]);

        // Reader side.
        let mut inc = stream_layer(stream_cfg());
        inc.epoch_add(Some(Box::new(Seal { pre: 2, post: 4 }))).unwrap();
        inc.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();
        inc.transport_mut().push_stream(&wire);

        {
            let handle = inc.read_start().unwrap();
            assert_eq!(handle.reader.get(5).unwrap(), b"HELLO");
            handle.reader.commit().unwrap();
        }
        inc.read_done().unwrap();
    }

    #[test]
    fn tampered_record_fails_authentication() {
        let mut out = stream_layer(stream_cfg());
        out.epoch_add(Some(Box::new(Seal { pre: 2, post: 4 }))).unwrap();
        out.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        let wr = out.write_start(ContentType::APPLICATION_DATA, 0).unwrap();
        wr.get(5).unwrap().copy_from_slice(b"HELLO");
        wr.commit().unwrap();
        out.write_done().unwrap();
        out.write_flush().unwrap();

        let mut wire = out.transport.dispatched[0].to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        let mut inc = stream_layer(stream_cfg());
        inc.epoch_add(Some(Box::new(Seal { pre: 2, post: 4 }))).unwrap();
        inc.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();
        inc.transport_mut().push_stream(&wire);

        // Stream mode: failed authentication is fatal.
        assert!(matches!(inc.read_start(), Err(Error::InvalidRecord)));
    }

    #[test]
    fn unauthenticated_records_can_be_discarded_when_configured() {
        let mut cfg = stream_cfg();
        cfg.set_discard_unauthenticated(true);
        let mut layer = stream_layer(cfg);
        layer.epoch_add(Some(Box::new(BadMac))).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer.transport_mut().push_stream(&tls_record(0x17, &[1, 2, 3]));
        assert!(matches!(layer.read_start(), Err(Error::WantRead)));
    }
}

// ============================================================================
// Epoch lifecycle
// ============================================================================

mod epochs {
    use super::*;

    #[test]
    fn window_slides_when_permissions_move_on() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();
        let second = layer.epoch_add(None).unwrap();
        assert_eq!(second, 1);

        // The window is full and epoch 0 is still the default.
        assert!(matches!(layer.epoch_add(None), Err(Error::TooManyEpochs)));

        // Moving both defaults retires epoch 0.
        layer.epoch_usage(1, EpochUsage::READ_WRITE).unwrap();
        let third = layer.epoch_add(None).unwrap();
        assert_eq!(third, 2);

        // The retired epoch is gone for good.
        assert!(matches!(layer.check_epoch(0, EpochUsage::READ), Err(Error::InvalidEpoch)));
    }

    #[test]
    fn removing_write_permission_dispatches_the_open_record() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();
        layer.epoch_add(None).unwrap();

        // Leave a mergeable record open.
        let wr = layer.write_start(ContentType::HANDSHAKE, 0).unwrap();
        wr.get(4).unwrap().copy_from_slice(b"hand");
        wr.commit().unwrap();
        layer.write_done().unwrap();
        assert_eq!(layer.out.state, WriteState::Internal);

        // Moving the write default to epoch 1 flushes it out.
        layer.epoch_usage(1, EpochUsage::WRITE).unwrap();
        assert_eq!(layer.transport.dispatched.len(), 1);
        assert_eq!(layer.out.state, WriteState::Unset);
    }

    #[test]
    fn forced_sequence_number_controls_the_next_record() {
        let mut layer = datagram_layer(datagram_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        for _ in 0..2 {
            let wr = layer.write_start(ContentType::HANDSHAKE, 0).unwrap();
            wr.get(2).unwrap().copy_from_slice(b"cv");
            wr.commit().unwrap();
            layer.write_done().unwrap();
        }
        layer.force_next_sequence_number(0, 0).unwrap();
        for _ in 0..2 {
            let wr = layer.write_start(ContentType::HANDSHAKE, 0).unwrap();
            wr.get(2).unwrap().copy_from_slice(b"cv");
            wr.commit().unwrap();
            layer.write_done().unwrap();
        }

        let seqs: Vec<u64> = layer
            .transport
            .dispatched
            .iter()
            .map(|r| dtls_wire_seq(r))
            .collect();
        assert_eq!(seqs, vec![0, 1, 0, 1]);
    }

    #[test]
    fn forcing_sequence_numbers_is_datagram_only() {
        let mut layer = stream_layer(stream_cfg());
        layer.epoch_add(None).unwrap();
        assert!(matches!(
            layer.force_next_sequence_number(0, 0),
            Err(Error::UnexpectedOperation)
        ));
        assert!(matches!(
            layer.last_sequence_number(0),
            Err(Error::UnexpectedOperation)
        ));
    }

    #[test]
    fn last_sequence_number_tracks_valid_records() {
        let mut layer = datagram_layer(datagram_cfg());
        layer.epoch_add(None).unwrap();
        layer.epoch_usage(0, EpochUsage::READ_WRITE).unwrap();

        layer
            .transport_mut()
            .push_datagram(&dtls_record(0x17, 0, 42, &[1]));
        {
            let handle = layer.read_start().unwrap();
            handle.reader.get(1).unwrap();
            handle.reader.commit().unwrap();
        }
        layer.read_done().unwrap();
        assert_eq!(layer.last_sequence_number(0).unwrap(), 42);
    }
}
