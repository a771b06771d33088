//! Record header parse and serialize.
//!
//! Wire formats per RFC 5246 Section 6.2 (TLS) and RFC 6347 Section 4.1
//! (DTLS 1.0/1.2); all multibyte fields big-endian.
//!
//! ```text
//! TLS:   type(1) | version(2) | length(2)
//! DTLS:  type(1) | version(2) | epoch(2) | sequence(6) | length(2)
//! ```

use crate::config::Config;
use crate::error::Error;
use crate::transform::Record;
use crate::types::{
    ContentType, ProtocolVersion, TransportMode, DTLS12_HDR_LEN, TLS_HDR_LEN,
};

const TYPE_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 1;
const TLS_LEN_OFFSET: usize = 3;
const DTLS_EPOCH_OFFSET: usize = 3;
const DTLS_SEQ_OFFSET: usize = 5;
const DTLS_LEN_OFFSET: usize = 11;

/// Record header length of the given mode.
pub(crate) fn header_len(mode: TransportMode) -> usize {
    match mode {
        TransportMode::Stream => TLS_HDR_LEN,
        TransportMode::Datagram => DTLS12_HDR_LEN,
    }
}

/// Parsed record header, before epoch and replay policy are applied.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WireHeader {
    pub(crate) ty: ContentType,
    pub(crate) version: ProtocolVersion,
    /// Epoch field; 0 in stream mode where the header carries none.
    pub(crate) epoch: u16,
    /// Explicit sequence number; 0 in stream mode.
    pub(crate) seq: u64,
    /// Ciphertext length.
    pub(crate) len: usize,
}

/// Parses and validates a record header against the configuration.
///
/// Checks the content type against the valid set, the version against the
/// configured one (major version must be 3 in internal numbering), and the
/// ciphertext length against the incoming cap. Per-epoch checks happen in
/// the read path once the epoch is known.
pub(crate) fn parse_header(cfg: &Config, buf: &[u8]) -> Result<WireHeader, Error> {
    let hdr_len = header_len(cfg.mode);
    if buf.len() < hdr_len {
        return Err(Error::Internal);
    }

    let ty = ContentType(buf[TYPE_OFFSET]);
    if !cfg.is_valid_type(ty) {
        tracing::warn!(ty = ty.0, "record with disallowed content type");
        return Err(Error::InvalidRecord);
    }

    let version =
        ProtocolVersion::from_wire(cfg.mode, [buf[VERSION_OFFSET], buf[VERSION_OFFSET + 1]])
            .ok_or(Error::InvalidRecord)?;
    if version.major != 3 {
        tracing::warn!(major = version.major, "record with unsupported major version");
        return Err(Error::InvalidRecord);
    }
    // The version may be unspecified until the peer's first record; after
    // that every record must agree.
    if let Some(expected) = cfg.version {
        if version != expected {
            tracing::warn!(
                got = version.minor,
                expected = expected.minor,
                "record version mismatch"
            );
            return Err(Error::InvalidRecord);
        }
    }

    let (epoch, seq, len_offset) = match cfg.mode {
        TransportMode::Stream => (0, 0, TLS_LEN_OFFSET),
        TransportMode::Datagram => {
            let epoch = u16::from_be_bytes([buf[DTLS_EPOCH_OFFSET], buf[DTLS_EPOCH_OFFSET + 1]]);
            let mut seq = 0u64;
            for &b in &buf[DTLS_SEQ_OFFSET..DTLS_SEQ_OFFSET + 6] {
                seq = seq << 8 | b as u64;
            }
            (epoch, seq, DTLS_LEN_OFFSET)
        }
    };

    let len = u16::from_be_bytes([buf[len_offset], buf[len_offset + 1]]) as usize;
    if len > cfg.max_cipher_in {
        tracing::warn!(len, cap = cfg.max_cipher_in, "record ciphertext too long");
        return Err(Error::InvalidRecord);
    }

    Ok(WireHeader {
        ty,
        version,
        epoch,
        seq,
        len,
    })
}

/// Serializes the header of a protected record.
///
/// Called only after encryption, when the final ciphertext length is known;
/// `hdr` must be exactly the mode's header length.
pub(crate) fn write_header(mode: TransportMode, rec: &Record, hdr: &mut [u8]) {
    debug_assert_eq!(hdr.len(), header_len(mode));

    hdr[TYPE_OFFSET] = rec.ty.0;
    hdr[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&rec.version.to_wire(mode));
    let len = rec.payload.data_len as u16;
    match mode {
        TransportMode::Stream => {
            hdr[TLS_LEN_OFFSET..TLS_LEN_OFFSET + 2].copy_from_slice(&len.to_be_bytes());
        }
        TransportMode::Datagram => {
            hdr[DTLS_EPOCH_OFFSET..DTLS_EPOCH_OFFSET + 2]
                .copy_from_slice(&rec.epoch.to_be_bytes());
            let seq = rec.seq.to_be_bytes();
            hdr[DTLS_SEQ_OFFSET..DTLS_SEQ_OFFSET + 6].copy_from_slice(&seq[2..8]);
            hdr[DTLS_LEN_OFFSET..DTLS_LEN_OFFSET + 2].copy_from_slice(&len.to_be_bytes());
        }
    }
}
