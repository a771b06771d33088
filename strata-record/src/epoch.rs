//! Sliding window of connection state generations.
//!
//! Each epoch pairs a record protection transform with its sequence number
//! state: implicit in/out counters in stream mode, an explicit out counter
//! plus replay window in datagram mode. The window holds the few epochs a
//! connection uses simultaneously; retiring the base slides the window
//! forward and drops the retired transforms.

use alloc::boxed::Box;

use crate::error::Error;
use crate::transform::Transform;
use crate::types::{EpochId, TransportMode};

/// Number of epochs the window can hold simultaneously.
///
/// Two suffice for every (D)TLS version: the epoch being retired and its
/// successor.
pub const EPOCH_WINDOW: usize = 2;

/// Upper bound on `base + EPOCH_WINDOW`.
pub(crate) const EPOCH_LIMIT: usize = EpochId::MAX as usize;

/// Read/write permission bits of an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochUsage(u8);

impl EpochUsage {
    pub const NONE: EpochUsage = EpochUsage(0);
    pub const READ: EpochUsage = EpochUsage(1);
    pub const WRITE: EpochUsage = EpochUsage(2);
    pub const READ_WRITE: EpochUsage = EpochUsage(3);

    pub fn can_read(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub fn can_write(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: EpochUsage) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits present in `self` but not in `other`.
    pub fn removed_by(self, other: EpochUsage) -> EpochUsage {
        EpochUsage(self.0 & !other.0)
    }
}

/// Sliding window over the last 64 record sequence numbers (RFC 6347
/// Section 4.1.2.6).
///
/// Bit `top - seq` of the mask is set when `seq` has been seen.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ReplayWindow {
    pub(crate) top: u64,
    pub(crate) mask: u64,
}

impl ReplayWindow {
    /// Whether `seq` would be accepted.
    pub(crate) fn check(&self, seq: u64) -> bool {
        if seq > self.top {
            return true;
        }
        let behind = self.top - seq;
        behind < 64 && self.mask & (1u64 << behind) == 0
    }

    /// Marks `seq` as seen, shifting the window when it advances the top.
    pub(crate) fn update(&mut self, seq: u64) {
        if seq > self.top {
            let shift = seq - self.top;
            self.mask = if shift >= 64 { 0 } else { self.mask << shift };
            self.mask |= 1;
            self.top = seq;
        } else if self.top - seq < 64 {
            self.mask |= 1u64 << (self.top - seq);
        }
    }
}

/// Sequence number state, by transport mode.
#[derive(Debug)]
pub(crate) enum SeqNumbers {
    Stream {
        /// Implicit sequence number of the next outgoing record.
        next_out: u64,
        /// Implicit sequence number of the next incoming record.
        next_in: u64,
    },
    Datagram {
        /// Explicit sequence number of the next outgoing record.
        next_out: u64,
        /// Sequence number of the most recent valid incoming record. A
        /// server answering a ClientHello with a HelloVerifyRequest must
        /// echo this (RFC 6347 Section 4.2.1).
        last_seen: u64,
        replay: ReplayWindow,
    },
}

/// One live epoch: its transform and sequence state.
pub(crate) struct EpochSlot {
    /// `None` is the identity transform of the initial epoch.
    pub(crate) transform: Option<Box<dyn Transform>>,
    pub(crate) seq: SeqNumbers,
}

impl EpochSlot {
    fn new(mode: TransportMode, transform: Option<Box<dyn Transform>>) -> Self {
        let seq = match mode {
            TransportMode::Stream => SeqNumbers::Stream {
                next_out: 0,
                next_in: 0,
            },
            TransportMode::Datagram => SeqNumbers::Datagram {
                next_out: 0,
                last_seen: 0,
                replay: ReplayWindow::default(),
            },
        };
        EpochSlot { transform, seq }
    }

    /// Worst-case `(before, after)` growth of the slot's transform.
    pub(crate) fn expansion(&self) -> (usize, usize) {
        match &self.transform {
            Some(t) => t.expansion(),
            None => (0, 0),
        }
    }

    /// Takes the sequence number for the next outgoing record and advances
    /// the counter.
    pub(crate) fn next_out_seq(&mut self) -> Result<u64, Error> {
        let ctr = match &mut self.seq {
            SeqNumbers::Stream { next_out, .. } => next_out,
            SeqNumbers::Datagram { next_out, .. } => next_out,
        };
        let seq = *ctr;
        *ctr = seq.checked_add(1).ok_or(Error::CounterWrap)?;
        Ok(seq)
    }
}

/// Per-mode permission bookkeeping.
///
/// Stream transports have at most one read and one write epoch (the
/// defaults); datagram transports keep explicit bits per slot.
#[derive(Debug)]
pub(crate) enum Permissions {
    Stream {
        default_in: Option<u8>,
        default_out: Option<u8>,
    },
    Datagram([EpochUsage; EPOCH_WINDOW]),
}

/// The ring of live epochs.
pub(crate) struct EpochWindow {
    pub(crate) mode: TransportMode,
    /// Epoch id of slot 0.
    pub(crate) base: usize,
    /// Offset of the first free slot.
    pub(crate) next: usize,
    pub(crate) slots: [Option<EpochSlot>; EPOCH_WINDOW],
    pub(crate) perms: Permissions,
}

impl EpochWindow {
    pub(crate) fn new(mode: TransportMode) -> Self {
        let perms = match mode {
            TransportMode::Stream => Permissions::Stream {
                default_in: None,
                default_out: None,
            },
            TransportMode::Datagram => Permissions::Datagram(Default::default()),
        };
        EpochWindow {
            mode,
            base: 0,
            next: 0,
            slots: Default::default(),
            perms,
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.next == EPOCH_WINDOW
    }

    /// Registers a new epoch, taking ownership of its transform.
    pub(crate) fn add(
        &mut self,
        transform: Option<Box<dyn Transform>>,
    ) -> Result<EpochId, Error> {
        if self.is_full() || self.base + self.next >= EPOCH_LIMIT {
            return Err(Error::TooManyEpochs);
        }
        let id = self.base + self.next;
        self.slots[self.next] = Some(EpochSlot::new(self.mode, transform));
        self.next += 1;
        Ok(id as EpochId)
    }

    /// Maps an epoch id into a window offset.
    pub(crate) fn offset_of(&self, epoch: EpochId) -> Result<usize, Error> {
        let id = epoch as usize;
        if id < self.base || id - self.base >= self.next {
            return Err(Error::InvalidEpoch);
        }
        Ok(id - self.base)
    }

    pub(crate) fn slot(&self, epoch: EpochId) -> Result<&EpochSlot, Error> {
        let off = self.offset_of(epoch)?;
        self.slots[off].as_ref().ok_or(Error::Internal)
    }

    pub(crate) fn slot_mut(&mut self, epoch: EpochId) -> Result<&mut EpochSlot, Error> {
        let off = self.offset_of(epoch)?;
        self.slots[off].as_mut().ok_or(Error::Internal)
    }

    /// Whether the slot at `offset` grants `usage`.
    pub(crate) fn allows(&self, offset: usize, usage: EpochUsage) -> bool {
        match &self.perms {
            Permissions::Stream {
                default_in,
                default_out,
            } => {
                (!usage.can_read() || *default_in == Some(offset as u8))
                    && (!usage.can_write() || *default_out == Some(offset as u8))
            }
            Permissions::Datagram(bits) => bits[offset].contains(usage),
        }
    }

    /// Effective usage bits of the slot at `offset`.
    pub(crate) fn usage_at(&self, offset: usize) -> EpochUsage {
        match &self.perms {
            Permissions::Stream {
                default_in,
                default_out,
            } => {
                let mut u = EpochUsage::NONE;
                if *default_in == Some(offset as u8) {
                    u = EpochUsage(u.0 | EpochUsage::READ.0);
                }
                if *default_out == Some(offset as u8) {
                    u = EpochUsage(u.0 | EpochUsage::WRITE.0);
                }
                u
            }
            Permissions::Datagram(bits) => bits[offset],
        }
    }

    /// Grants `usage` to the slot at `offset`. In stream mode this moves
    /// the respective default; in datagram mode it replaces the bits.
    pub(crate) fn apply_usage(&mut self, offset: usize, usage: EpochUsage) {
        match &mut self.perms {
            Permissions::Stream {
                default_in,
                default_out,
            } => {
                if usage.can_read() {
                    *default_in = Some(offset as u8);
                }
                if usage.can_write() {
                    *default_out = Some(offset as u8);
                }
            }
            Permissions::Datagram(bits) => bits[offset] = usage,
        }
    }

    pub(crate) fn default_in_epoch(&self) -> Option<EpochId> {
        match &self.perms {
            Permissions::Stream { default_in, .. } => {
                default_in.map(|off| (self.base + off as usize) as EpochId)
            }
            Permissions::Datagram(_) => None,
        }
    }

    pub(crate) fn default_out_epoch(&self) -> Option<EpochId> {
        match &self.perms {
            Permissions::Stream { default_out, .. } => {
                default_out.map(|off| (self.base + off as usize) as EpochId)
            }
            Permissions::Datagram(_) => None,
        }
    }

    /// Slides the window forward by `n` slots, dropping the retired epochs
    /// together with their transforms.
    pub(crate) fn shift(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        tracing::debug!(shift = n, old_base = self.base, "epoch window slides");
        self.base += n;
        self.next -= n;
        for i in 0..EPOCH_WINDOW {
            self.slots[i] = if i + n < EPOCH_WINDOW {
                self.slots[i + n].take()
            } else {
                None
            };
        }
        match &mut self.perms {
            Permissions::Stream {
                default_in,
                default_out,
            } => {
                // Retired slots are never a default; the offsets only move.
                *default_in = default_in.map(|d| d - n as u8);
                *default_out = default_out.map(|d| d - n as u8);
            }
            Permissions::Datagram(bits) => {
                for i in 0..EPOCH_WINDOW {
                    bits[i] = if i + n < EPOCH_WINDOW {
                        bits[i + n]
                    } else {
                        EpochUsage::NONE
                    };
                }
            }
        }
    }
}
