//! # strata-buf: Request-and-Commit Buffering Primitives
//!
//! Building blocks for translating between a producer handing over data in
//! chunks of arbitrary size and a consumer that wants contiguous spans of
//! again arbitrary, and potentially different, size.
//!
//! - [`Reader`] accumulates incoming fragments and serves them back as
//!   contiguous read spans, with cheap rollback of uncommitted reads when a
//!   fragment ends in the middle of a consumer request.
//! - [`Writer`] is the outgoing twin: it hands out contiguous write spans
//!   over a caller-provided output buffer and can overflow into a backing
//!   queue once the buffer is exhausted.
//!
//! ## Design Principles
//!
//! 1. **Sans-IO**: nothing here touches a socket. Fragments come in as
//!    [`bytes::Bytes`], output buffers as [`bytes::BytesMut`].
//!
//! 2. **`no_std` + `alloc`**: the crate only needs an allocator; disable
//!    the default `std` feature for embedded use.
//!
//! 3. **Allocation-free at steady state**: the accumulator and the queue are
//!    caller-provided storage, moved in at construction and recoverable when
//!    the primitive is retired.
//!
//! 4. **Speculative reads are revocable**: data is only consumed once it is
//!    committed; everything between the commit cursor and the read cursor
//!    can be rolled back and replayed after more input arrives.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod reader;
pub mod writer;

pub use error::Error;
pub use reader::{FeedStatus, Reader};
pub use writer::{Feed, Reclaimed, Writer};
