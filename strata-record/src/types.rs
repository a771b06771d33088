//! Wire-level types and constants shared across the record layer.

/// Record content type as carried in the record header.
///
/// Valid identifiers occupy `0..32`; which of them a context actually
/// accepts is configured per connection (see [`crate::Config::add_type`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentType(pub u8);

impl ContentType {
    pub const CHANGE_CIPHER_SPEC: ContentType = ContentType(20);
    pub const ALERT: ContentType = ContentType(21);
    pub const HANDSHAKE: ContentType = ContentType(22);
    pub const APPLICATION_DATA: ContentType = ContentType(23);
    pub const ACK: ContentType = ContentType(25);

    /// Largest valid content type identifier.
    pub const MAX_ID: u8 = 31;

    /// Whether the identifier is within the representable range.
    pub fn in_range(self) -> bool {
        self.0 <= Self::MAX_ID
    }
}

/// Bitset over content type identifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeSet(u32);

impl TypeSet {
    pub const EMPTY: TypeSet = TypeSet(0);

    pub fn contains(self, ty: ContentType) -> bool {
        ty.in_range() && self.0 & (1u32 << ty.0) != 0
    }

    pub fn insert(&mut self, ty: ContentType) {
        debug_assert!(ty.in_range());
        self.0 |= 1u32 << ty.0;
    }
}

/// Transport flavor underneath the record layer.
///
/// Stream maps to TLS, datagram to DTLS; a handful of behaviours differ by
/// mode and are called out on the operations concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stream,
    Datagram,
}

/// Identifier of a connection state generation.
pub type EpochId = u16;

/// Protocol version of a record, kept in TLS numbering internally
/// (`major = 3`; DTLS 1.0 is carried as TLS 1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const TLS1_0: ProtocolVersion = ProtocolVersion { major: 3, minor: 1 };
    pub const TLS1_1: ProtocolVersion = ProtocolVersion { major: 3, minor: 2 };
    pub const TLS1_2: ProtocolVersion = ProtocolVersion { major: 3, minor: 3 };
    /// DTLS 1.0 in internal numbering.
    pub const DTLS1_0: ProtocolVersion = ProtocolVersion { major: 3, minor: 2 };
    /// DTLS 1.2 in internal numbering.
    pub const DTLS1_2: ProtocolVersion = ProtocolVersion { major: 3, minor: 3 };

    /// Encodes the version for the record header.
    ///
    /// DTLS stores the one's complement offsets `255 - (major - 2)` and
    /// `255 - (minor - 1)`, with DTLS 1.0 written from its TLS 1.1
    /// internal representation.
    pub fn to_wire(self, mode: TransportMode) -> [u8; 2] {
        match mode {
            TransportMode::Stream => [self.major, self.minor],
            TransportMode::Datagram => {
                let mut minor = self.minor;
                if minor == Self::TLS1_1.minor {
                    minor -= 1;
                }
                [255 - (self.major - 2), 255 - (minor - 1)]
            }
        }
    }

    /// Decodes a version from the record header.
    ///
    /// Returns `None` when the bytes do not map back into the internal
    /// numbering.
    pub fn from_wire(mode: TransportMode, b: [u8; 2]) -> Option<ProtocolVersion> {
        match mode {
            TransportMode::Stream => Some(ProtocolVersion {
                major: b[0],
                minor: b[1],
            }),
            TransportMode::Datagram => {
                let major = 255u16.checked_sub(b[0] as u16)? + 2;
                let mut minor = 255u16.checked_sub(b[1] as u16)? + 1;
                if minor == 1 {
                    minor += 1;
                }
                if major > u8::MAX as u16 || minor > u8::MAX as u16 {
                    return None;
                }
                Some(ProtocolVersion {
                    major: major as u8,
                    minor: minor as u8,
                })
            }
        }
    }
}

/// TLS record header length (RFC 5246 Section 6.2).
pub const TLS_HDR_LEN: usize = 5;

/// DTLS 1.0/1.2 record header length (RFC 6347 Section 4.1).
pub const DTLS12_HDR_LEN: usize = 13;

/// Architectural plaintext bound (RFC 5246 Section 6.2.1).
pub const MAX_PLAINTEXT_LEN: usize = 16384;

/// Ciphertext bound for TLS 1.2 and earlier (compression + protection).
pub const MAX_CIPHERTEXT_LEN_TLS12: usize = MAX_PLAINTEXT_LEN + 2048;

/// Ciphertext bound for TLS 1.3 (RFC 8446 Section 5.2).
pub const MAX_CIPHERTEXT_LEN_TLS13: usize = MAX_PLAINTEXT_LEN + 256;
