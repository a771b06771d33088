//! # strata-record: (D)TLS Record Layer
//!
//! The record layer translates between a stream or datagram of protected
//! records on the wire and a typed, epoch-qualified message stream consumed
//! by a handshake engine above it.
//!
//! ```text
//! strata-record/
//! ├── error       - Unified error kinds and their dispositions
//! ├── types       - Content types, protocol versions, wire constants
//! ├── config      - Per-content-type policy, size limits, replay/MAC knobs
//! ├── transform   - Record protection trait (AEAD / MAC-then-encrypt)
//! ├── transport   - Lower buffering layer trait (whole-record buffers)
//! ├── record      - Record header parse/serialize (RFC 5246 / RFC 6347)
//! ├── epoch       - Sliding window of connection states and replay windows
//! └── layer       - The read/write state machines tying it all together
//! ```
//!
//! ## Design Principles
//!
//! 1. **Sans-IO**: no sockets, no event loop. The lower buffering layer is a
//!    trait ([`TransportBuffers`]) supplying contiguous whole-record
//!    buffers; `WantRead`/`WantWrite` surface every suspension point to the
//!    caller's event loop, leaving the abstract state untouched so the same
//!    call can simply be retried.
//!
//! 2. **Zero-copy buffer handover**: record buffers move between the layers
//!    as [`bytes::BytesMut`]/[`bytes::Bytes`] values. An outgoing record
//!    buffer is split into header and payload sub-spans and rejoined O(1)
//!    at dispatch; decrypted payloads reach the reader as refcounted
//!    slices.
//!
//! 3. **Pluggable protection**: record protection lives behind the
//!    [`Transform`] trait, one owned instance per epoch. `None` is the
//!    identity transform of the initial epoch.
//!
//! 4. **Single-threaded cooperative**: one context per connection
//!    direction-pair, no internal locks. Concurrent connections use
//!    independent contexts.
//!
//! 5. **`no_std` + `alloc`**: the record layer only needs an allocator;
//!    disable the default `std` feature for embedded use.
//!
//! ## Reading
//!
//! [`RecordLayer::read_start`] fetches, authenticates and decrypts the next
//! record and exposes its payload through a [`strata_buf::Reader`]. Content
//! types configured as *pausable* may span record boundaries: an unfinished
//! message is held back in an accumulator and resumed when the next record
//! of the same type arrives.
//!
//! ## Writing
//!
//! [`RecordLayer::write_start`] opens a record for a `(type, epoch)` pair
//! and hands out a [`strata_buf::Writer`]. Successive messages of a
//! *mergeable* type share one record; *pausable* types may overflow into a
//! queue that is drained into subsequent records.
//! [`RecordLayer::write_flush`] drives everything down to the transport.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod epoch;
pub mod error;
pub mod layer;
pub mod record;
pub mod transform;
pub mod transport;
pub mod types;

pub use config::{Config, RandomSource};
pub use epoch::{EpochUsage, EPOCH_WINDOW};
pub use error::Error;
pub use layer::{ReadHandle, RecordLayer};
pub use transform::{PayloadBuf, Record, Transform};
pub use transport::TransportBuffers;
pub use types::{ContentType, EpochId, ProtocolVersion, TransportMode, TypeSet};
