//! Per-connection configuration and content-type policy.

use alloc::boxed::Box;

use crate::error::Error;
use crate::types::{
    ContentType, ProtocolVersion, TransportMode, TypeSet, MAX_CIPHERTEXT_LEN_TLS12,
    MAX_PLAINTEXT_LEN,
};

/// Source of randomness handed to the record protection on encryption.
///
/// Implementations fill the destination with random bytes. Transforms that
/// do not need randomness never receive a call.
pub trait RandomSource {
    fn fill(&mut self, dst: &mut [u8]) -> Result<(), Error>;
}

/// Record layer configuration.
///
/// The four per-type flag sets are maintained through [`Config::add_type`]
/// and obey `pausable ⊆ valid`, `mergeable ⊆ valid`, `empty ⊆ valid`.
pub struct Config {
    pub(crate) mode: TransportMode,
    /// Protocol version; `None` until negotiated, in which case the version
    /// of the first valid incoming record is adopted.
    pub(crate) version: Option<ProtocolVersion>,
    /// Plaintext cap for outgoing records.
    pub(crate) max_plain_out: usize,
    /// Plaintext cap for incoming records.
    pub(crate) max_plain_in: usize,
    /// Ciphertext cap for incoming records.
    pub(crate) max_cipher_in: usize,
    valid: TypeSet,
    pausable: TypeSet,
    mergeable: TypeSet,
    empty_ok: TypeSet,
    /// Datagram mode: reject records caught by the replay window.
    pub(crate) anti_replay: bool,
    /// Tolerated records with bad MAC before the context fails; 0 means no
    /// limit. Datagram mode only.
    pub(crate) badmac_limit: u64,
    /// Stream mode: silently drop records that fail authentication instead
    /// of failing the context (unauthenticated early-data tolerance).
    pub(crate) discard_unauthenticated: bool,
    pub(crate) rng: Option<Box<dyn RandomSource>>,
}

impl Config {
    pub fn new(mode: TransportMode) -> Self {
        Config {
            mode,
            version: None,
            max_plain_out: MAX_PLAINTEXT_LEN,
            max_plain_in: MAX_PLAINTEXT_LEN,
            max_cipher_in: MAX_CIPHERTEXT_LEN_TLS12,
            valid: TypeSet::EMPTY,
            pausable: TypeSet::EMPTY,
            mergeable: TypeSet::EMPTY,
            empty_ok: TypeSet::EMPTY,
            anti_replay: true,
            badmac_limit: 0,
            discard_unauthenticated: false,
            rng: None,
        }
    }

    /// Registers a content type the context should accept.
    ///
    /// Must be called exactly once per type. `pausable` allows messages of
    /// the type to span records (stream mode), `mergeable` allows several
    /// messages to share one record, `empty_ok` permits empty record
    /// bodies.
    pub fn add_type(
        &mut self,
        ty: ContentType,
        pausable: bool,
        mergeable: bool,
        empty_ok: bool,
    ) -> Result<(), Error> {
        if !ty.in_range() || self.valid.contains(ty) {
            return Err(Error::InvalidArgs);
        }
        self.valid.insert(ty);
        if pausable {
            self.pausable.insert(ty);
        }
        if mergeable {
            self.mergeable.insert(ty);
        }
        if empty_ok {
            self.empty_ok.insert(ty);
        }
        Ok(())
    }

    /// Pins the protocol version. Records of any other version are invalid.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = Some(version);
    }

    pub fn set_max_plain_out(&mut self, n: usize) {
        self.max_plain_out = n;
    }

    pub fn set_max_plain_in(&mut self, n: usize) {
        self.max_plain_in = n;
    }

    pub fn set_max_cipher_in(&mut self, n: usize) {
        self.max_cipher_in = n;
    }

    pub fn set_anti_replay(&mut self, on: bool) {
        self.anti_replay = on;
    }

    pub fn set_badmac_limit(&mut self, limit: u64) {
        self.badmac_limit = limit;
    }

    pub fn set_discard_unauthenticated(&mut self, on: bool) {
        self.discard_unauthenticated = on;
    }

    pub fn set_random_source(&mut self, rng: Box<dyn RandomSource>) {
        self.rng = Some(rng);
    }

    pub(crate) fn is_valid_type(&self, ty: ContentType) -> bool {
        self.valid.contains(ty)
    }

    /// Pausing only exists on stream transports.
    pub(crate) fn can_pause(&self, ty: ContentType) -> bool {
        self.mode == TransportMode::Stream && self.pausable.contains(ty)
    }

    pub(crate) fn can_merge(&self, ty: ContentType) -> bool {
        self.mergeable.contains(ty)
    }

    pub(crate) fn empty_allowed(&self, ty: ContentType) -> bool {
        self.empty_ok.contains(ty)
    }
}
