//! # Incoming Byte-Stream Accumulation
//!
//! A [`Reader`] collects bytes arriving in arbitrarily sized fragments and
//! serves them back as contiguous spans of caller-chosen length.
//!
//! From the producer's perspective the reader is in one of three states:
//!
//! - **Unset** — no fragment is managed and no backlog is held.
//! - **Accumulating** — no fragment is managed, but data from previous
//!   fragments (and/or an unsatisfied read request) is held back.
//! - **Attached** — a fragment is managed and being consumed.
//!
//! [`Reader::feed`] moves the reader into the attached state (or absorbs the
//! fragment into the backlog while a previous request is still
//! unsatisfiable), and [`Reader::reclaim`] moves it back out, backing up
//! whatever the consumer has read but not committed.

use alloc::vec::Vec;

use bytes::Bytes;

use crate::error::Error;

/// Outcome of [`Reader::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// The fragment is attached; reads can be served.
    Attached,
    /// The fragment was absorbed into the accumulator but the outstanding
    /// read request still cannot be served; feed the next fragment.
    Accumulating,
}

/// Byte-stream accumulator with commit/rollback semantics.
///
/// The logical stream position `0` is the last reclaim boundary. Bytes in
/// `[0, commit)` are consumed, bytes in `[commit, end)` have been handed to
/// the consumer but are revocable, bytes at `end` and beyond are unread.
#[derive(Debug, Default)]
pub struct Reader {
    /// The fragment currently being consumed, if any. The reader never
    /// copies out of the fragment unless a read spans the
    /// accumulator/fragment boundary.
    frag: Option<Bytes>,
    /// Read cursor into the logical stream.
    end: usize,
    /// Commit cursor, `commit <= end`.
    commit: usize,
    /// Bytes missing on the last failed exact read; consumed by the
    /// pause/resume cycle.
    pending: usize,
    /// Caller-provided backing storage for pausing.
    acc: Option<Vec<u8>>,
    /// Backlog bytes currently held in the accumulator. The accumulator
    /// contents are a prefix of the logical stream; an attached fragment
    /// logically starts at offset `acc_avail`.
    acc_avail: usize,
    /// While accumulating: bytes still to gather before the reader can be
    /// reattached.
    acc_remaining: usize,
}

impl Reader {
    /// Creates a reader, optionally with accumulator storage.
    ///
    /// Without an accumulator the reader still works, but any attempt to
    /// reclaim a fragment with unprocessed data fails with
    /// [`Error::NeedAccumulator`].
    pub fn new(acc: Option<Vec<u8>>) -> Self {
        Reader {
            acc,
            ..Reader::default()
        }
    }

    /// Retires the reader and recovers the accumulator storage.
    pub fn into_accumulator(self) -> Option<Vec<u8>> {
        self.acc
    }

    /// True if the reader holds backlog awaiting continuation.
    pub fn is_paused(&self) -> bool {
        self.frag.is_none() && (self.acc_avail > 0 || self.acc_remaining > 0)
    }

    /// True if a fragment is currently attached.
    pub fn is_attached(&self) -> bool {
        self.frag.is_some()
    }

    /// Hands a fragment of incoming data to the reader.
    ///
    /// If a previous read request is still short by more than the fragment
    /// provides, the fragment is absorbed into the accumulator and
    /// [`FeedStatus::Accumulating`] is returned; otherwise the fragment is
    /// attached.
    pub fn feed(&mut self, frag: Bytes) -> Result<FeedStatus, Error> {
        if self.frag.is_some() {
            return Err(Error::UnexpectedOperation);
        }

        if self.acc_remaining > 0 && frag.len() < self.acc_remaining {
            let acc = self.acc.as_mut().ok_or(Error::NeedAccumulator)?;
            if acc.len() - self.acc_avail < frag.len() {
                return Err(Error::AccumulatorTooSmall);
            }
            acc[self.acc_avail..self.acc_avail + frag.len()].copy_from_slice(&frag);
            self.acc_avail += frag.len();
            self.acc_remaining -= frag.len();
            return Ok(FeedStatus::Accumulating);
        }

        self.acc_remaining = 0;
        self.pending = 0;
        self.frag = Some(frag);
        Ok(FeedStatus::Attached)
    }

    /// Fetches exactly `desired` bytes starting at the read cursor.
    ///
    /// Fails with [`Error::OutOfData`] if the request cannot be served in
    /// full; the shortfall is remembered so that a subsequent
    /// [`Reader::reclaim`] knows how much data to gather before the reader
    /// can be resumed.
    pub fn get(&mut self, desired: usize) -> Result<&[u8], Error> {
        self.get_inner(desired, true)
    }

    /// Fetches up to `desired` bytes starting at the read cursor.
    ///
    /// A request crossing the accumulator/fragment boundary is clamped to
    /// the accumulator part; the next call continues in the fragment.
    pub fn get_up_to(&mut self, desired: usize) -> Result<&[u8], Error> {
        self.get_inner(desired, false)
    }

    fn get_inner(&mut self, desired: usize, exact: bool) -> Result<&[u8], Error> {
        let frag = self.frag.as_ref().ok_or(Error::UnexpectedOperation)?;
        let logical_end = self.acc_avail + frag.len();
        let avail = logical_end - self.end;

        if exact && desired > avail {
            self.pending = desired - avail;
            return Err(Error::OutOfData);
        }
        let mut n = desired.min(avail);
        if n == 0 && desired > 0 {
            return Err(Error::OutOfData);
        }

        let start = self.end;
        let span: &[u8] = if start >= self.acc_avail {
            let off = start - self.acc_avail;
            &frag[off..off + n]
        } else if start + n <= self.acc_avail {
            let acc = self.acc.as_ref().ok_or(Error::NeedAccumulator)?;
            &acc[start..start + n]
        } else if !exact {
            n = self.acc_avail - start;
            let acc = self.acc.as_ref().ok_or(Error::NeedAccumulator)?;
            &acc[start..start + n]
        } else {
            // The request spans the accumulator/fragment boundary. Splice
            // the needed fragment prefix into the accumulator tail so the
            // returned span is contiguous.
            let from_frag = start + n - self.acc_avail;
            let acc = self.acc.as_mut().ok_or(Error::NeedAccumulator)?;
            if acc.len() < self.acc_avail + from_frag {
                return Err(Error::AccumulatorTooSmall);
            }
            acc[self.acc_avail..self.acc_avail + from_frag].copy_from_slice(&frag[..from_frag]);
            &acc[start..start + n]
        };

        self.end = start + n;
        self.pending = 0;
        Ok(span)
    }

    /// Marks all previously fetched bytes as processed.
    pub fn commit(&mut self) -> Result<(), Error> {
        if self.frag.is_none() {
            return Err(Error::UnexpectedOperation);
        }
        self.commit = self.end;
        Ok(())
    }

    /// Revokes the reader's access to the current fragment.
    ///
    /// Returns `false` if everything was committed (the reader is unset
    /// afterwards) and `true` if unprocessed data was backed up into the
    /// accumulator (the reader is paused and must be resumed by feeding
    /// further fragments).
    ///
    /// Fails with [`Error::DataLeft`] if the fragment still holds unread
    /// data and no read request is outstanding; the fragment then stays
    /// attached so the consumer can continue within it.
    pub fn reclaim(&mut self) -> Result<bool, Error> {
        let Some(frag) = self.frag.take() else {
            return Err(Error::UnexpectedOperation);
        };
        let logical_end = self.acc_avail + frag.len();

        if self.pending == 0 {
            if self.end == logical_end && self.commit == self.end {
                self.acc_avail = 0;
                self.end = 0;
                self.commit = 0;
                return Ok(false);
            }
            if self.end < logical_end {
                self.frag = Some(frag);
                return Err(Error::DataLeft);
            }
        }

        // Back up everything from the commit point and roll the cursors
        // back so the consumer replays its reads after resumption.
        let retain = logical_end - self.commit;
        let Some(acc) = self.acc.as_mut() else {
            self.frag = Some(frag);
            return Err(Error::NeedAccumulator);
        };
        if acc.len() < retain + self.pending {
            self.frag = Some(frag);
            return Err(Error::AccumulatorTooSmall);
        }

        if self.commit < self.acc_avail {
            acc.copy_within(self.commit..self.acc_avail, 0);
        }
        let frag_from = self.commit.saturating_sub(self.acc_avail);
        let dst = self.acc_avail.saturating_sub(self.commit);
        acc[dst..dst + (frag.len() - frag_from)].copy_from_slice(&frag[frag_from..]);

        self.acc_avail = retain;
        self.acc_remaining = self.pending;
        self.pending = 0;
        self.end = 0;
        self.commit = 0;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rd_with_acc(n: usize) -> Reader {
        Reader::new(Some(vec![0u8; n]))
    }

    #[test]
    fn get_commit_reclaim_roundtrip() {
        let mut rd = Reader::new(None);
        assert_eq!(rd.feed(Bytes::from_static(b"hello")).unwrap(), FeedStatus::Attached);
        assert_eq!(rd.get(5).unwrap(), b"hello");
        rd.commit().unwrap();
        assert!(!rd.reclaim().unwrap());
        assert!(!rd.is_paused());
    }

    #[test]
    fn partial_get_serves_what_is_there() {
        let mut rd = Reader::new(None);
        rd.feed(Bytes::from_static(b"abcd")).unwrap();
        assert_eq!(rd.get_up_to(10).unwrap(), b"abcd");
        assert!(matches!(rd.get_up_to(1), Err(Error::OutOfData)));
    }

    #[test]
    fn exact_get_fails_without_advancing() {
        let mut rd = Reader::new(None);
        rd.feed(Bytes::from_static(b"abcd")).unwrap();
        assert!(matches!(rd.get(6), Err(Error::OutOfData)));
        // The cursor did not move.
        assert_eq!(rd.get(4).unwrap(), b"abcd");
    }

    #[test]
    fn uncommitted_reads_pause_and_replay() {
        // A 4-byte message prefix is read but not committed; the reader
        // pauses and replays it in front of the continuation.
        let mut rd = rd_with_acc(16);
        rd.feed(Bytes::from_static(b"\x01\x00\x00\x08")).unwrap();
        assert_eq!(rd.get_up_to(12).unwrap().len(), 4);
        assert!(rd.reclaim().unwrap());
        assert!(rd.is_paused());

        assert_eq!(rd.feed(Bytes::from_static(b"abcd")).unwrap(), FeedStatus::Attached);
        assert_eq!(rd.get(8).unwrap(), b"\x01\x00\x00\x08abcd");
        rd.commit().unwrap();
        assert!(!rd.reclaim().unwrap());
    }

    #[test]
    fn failed_exact_request_accumulates_until_satisfiable() {
        let mut rd = rd_with_acc(16);
        rd.feed(Bytes::from_static(b"abcd")).unwrap();
        assert!(matches!(rd.get(12), Err(Error::OutOfData)));
        assert!(rd.reclaim().unwrap());

        // 3 < 8 missing bytes: absorbed.
        assert_eq!(rd.feed(Bytes::from_static(b"efg")).unwrap(), FeedStatus::Accumulating);
        // 5 >= 5 missing bytes: attached.
        assert_eq!(rd.feed(Bytes::from_static(b"hijkl")).unwrap(), FeedStatus::Attached);
        assert_eq!(rd.get(12).unwrap(), b"abcdefghijkl");
        rd.commit().unwrap();
        assert!(!rd.reclaim().unwrap());
    }

    #[test]
    fn partial_get_stops_at_backlog_boundary() {
        let mut rd = rd_with_acc(16);
        rd.feed(Bytes::from_static(b"abcd")).unwrap();
        rd.get_up_to(4).unwrap();
        rd.reclaim().unwrap();
        rd.feed(Bytes::from_static(b"efgh")).unwrap();

        // First call is clamped to the backlog, second continues in the
        // fragment.
        assert_eq!(rd.get_up_to(8).unwrap(), b"abcd");
        assert_eq!(rd.get_up_to(8).unwrap(), b"efgh");
    }

    #[test]
    fn data_left_keeps_fragment_attached() {
        let mut rd = Reader::new(None);
        rd.feed(Bytes::from_static(b"aabb")).unwrap();
        assert_eq!(rd.get(2).unwrap(), b"aa");
        rd.commit().unwrap();
        assert!(matches!(rd.reclaim(), Err(Error::DataLeft)));
        assert_eq!(rd.get(2).unwrap(), b"bb");
        rd.commit().unwrap();
        assert!(!rd.reclaim().unwrap());
    }

    #[test]
    fn pause_without_accumulator_is_rejected() {
        let mut rd = Reader::new(None);
        rd.feed(Bytes::from_static(b"abcd")).unwrap();
        rd.get_up_to(4).unwrap();
        assert!(matches!(rd.reclaim(), Err(Error::NeedAccumulator)));
    }

    #[test]
    fn accumulator_too_small_is_rejected() {
        let mut rd = rd_with_acc(2);
        rd.feed(Bytes::from_static(b"abcd")).unwrap();
        rd.get_up_to(4).unwrap();
        assert!(matches!(rd.reclaim(), Err(Error::AccumulatorTooSmall)));
    }

    #[test]
    fn feed_while_attached_is_rejected() {
        let mut rd = Reader::new(None);
        rd.feed(Bytes::from_static(b"a")).unwrap();
        assert!(matches!(
            rd.feed(Bytes::from_static(b"b")),
            Err(Error::UnexpectedOperation)
        ));
    }

    proptest! {
        /// Committed reads reproduce the concatenation of the fed
        /// fragments, no matter how the input is split.
        #[test]
        fn roundtrip_arbitrary_fragmentation(
            data in proptest::collection::vec(any::<u8>(), 1..256),
            cuts in proptest::collection::vec(1usize..32, 0..8),
            chunk in 1usize..16,
        ) {
            let mut rd = Reader::new(Some(vec![0u8; 512]));
            let mut frags = Vec::new();
            let mut rest = &data[..];
            for c in cuts {
                if rest.is_empty() { break; }
                let c = c.min(rest.len());
                frags.push(Bytes::copy_from_slice(&rest[..c]));
                rest = &rest[c..];
            }
            if !rest.is_empty() {
                frags.push(Bytes::copy_from_slice(rest));
            }

            let mut read_back = Vec::new();
            for frag in frags {
                if rd.feed(frag).unwrap() == FeedStatus::Accumulating {
                    continue;
                }
                loop {
                    match rd.get_up_to(chunk) {
                        Ok(span) => {
                            read_back.extend_from_slice(span);
                            rd.commit().unwrap();
                        }
                        Err(Error::OutOfData) => break,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                match rd.reclaim() {
                    Ok(_) => {}
                    Err(Error::DataLeft) => unreachable!("drained above"),
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            prop_assert_eq!(read_back, data);
        }
    }
}
