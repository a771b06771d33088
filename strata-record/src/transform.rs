//! Record protection interface.
//!
//! The record layer does not implement cryptography; each epoch owns a
//! boxed [`Transform`] (or `None` for the identity of the initial epoch)
//! and hands it records to protect or unprotect in place.

use bytes::{Bytes, BytesMut};

use crate::config::RandomSource;
use crate::error::Error;
use crate::types::{ContentType, EpochId, ProtocolVersion};

/// A payload sub-span inside an owned work buffer.
///
/// The work buffer leaves room in front of and behind the payload for the
/// transform to grow into: protection adds an explicit IV or inner header
/// before the data and a MAC or AEAD tag after it. After encryption the
/// ciphertext must sit at offset 0 so it lands flush against the record
/// header.
#[derive(Debug)]
pub struct PayloadBuf {
    /// The work buffer containing the payload.
    pub buf: BytesMut,
    /// Offset of the payload within `buf`.
    pub data_offset: usize,
    /// Length of the payload.
    pub data_len: usize,
}

impl PayloadBuf {
    /// The payload as a shared slice.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.data_offset..self.data_offset + self.data_len]
    }

    /// The payload as a mutable slice.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.data_offset..self.data_offset + self.data_len]
    }

    /// Consumes the buffer into a refcounted slice of the payload.
    pub fn into_data(self) -> Bytes {
        self.buf
            .freeze()
            .slice(self.data_offset..self.data_offset + self.data_len)
    }
}

/// A protected or unprotected record together with its header fields.
#[derive(Debug)]
pub struct Record {
    /// Record sequence number (implicit in stream mode).
    pub seq: u64,
    /// Epoch protecting the record.
    pub epoch: EpochId,
    /// Record content type.
    pub ty: ContentType,
    /// Protocol version carried in the header.
    pub version: ProtocolVersion,
    /// Plaintext or ciphertext, depending on the protection state.
    pub payload: PayloadBuf,
}

/// Per-epoch record protection.
///
/// An implementation is moved into the epoch window when the epoch is
/// registered and is dropped when the epoch retires; the caller must not
/// keep references to it.
pub trait Transform {
    /// Worst-case bytes the transform adds `(before, after)` the plaintext.
    fn expansion(&self) -> (usize, usize);

    /// Protects `rec.payload` in place.
    ///
    /// On success the ciphertext spans `[0, data_len)` of the work buffer,
    /// i.e. `data_offset` must come out as 0.
    fn encrypt(
        &mut self,
        rec: &mut Record,
        rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<(), Error>;

    /// Unprotects `rec.payload` in place.
    ///
    /// Fails with [`Error::AuthFailed`] when the record cannot be
    /// authenticated.
    fn decrypt(&mut self, rec: &mut Record) -> Result<(), Error>;
}
