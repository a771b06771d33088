//! # Outgoing Byte-Stream Production
//!
//! A [`Writer`] is the outgoing twin of the reader: the producer feeds it an
//! output buffer, the consumer fetches contiguous write spans into it and
//! commits what it has produced. When the output buffer is exhausted the
//! writer can overflow into a backing queue, so a consumer-side message
//! larger than the current buffer is written once and drained into
//! subsequent buffers by later feeds.

use alloc::vec::Vec;

use bytes::BytesMut;

use crate::error::Error;

/// Outcome of [`Writer::feed`].
#[derive(Debug)]
pub enum Feed {
    /// The buffer is attached and open for writing. Its prefix may already
    /// hold data drained from the queue.
    Open,
    /// The buffer was filled entirely with queued data and is handed back
    /// for dispatch; the writer still holds a queue remainder, so feed the
    /// next buffer afterwards.
    Filled(BytesMut),
}

/// Result of a successful [`Writer::reclaim`].
#[derive(Debug)]
pub struct Reclaimed {
    /// The output buffer, returned to the producer.
    pub out: BytesMut,
    /// Bytes of committed data inside the output buffer.
    pub written: usize,
    /// Committed bytes that overflowed into the queue and await the next
    /// feed.
    pub queued: usize,
}

/// Contiguous request-and-commit writer with optional overflow queue.
#[derive(Debug, Default)]
pub struct Writer {
    out: Option<BytesMut>,
    /// Commit cursor. May exceed the output buffer length when committed
    /// data overflowed into the queue.
    commit: usize,
    /// Write cursor, `commit <= end`.
    end: usize,
    /// Caller-provided overflow storage.
    queue: Option<Vec<u8>>,
    /// While serving from the queue: overlap between the start of the queue
    /// and the unfilled tail of the output buffer. Between buffers: read
    /// position of the pending queue data.
    queue_next: usize,
    /// Queue bytes pending to be drained into the next buffer.
    queue_remaining: usize,
}

impl Writer {
    /// Creates a writer, optionally with queue storage.
    ///
    /// Without a queue, write requests beyond the remaining buffer space
    /// simply fail with [`Error::OutOfData`].
    pub fn new(queue: Option<Vec<u8>>) -> Self {
        Writer {
            queue,
            ..Writer::default()
        }
    }

    /// Retires the writer and recovers the queue storage.
    ///
    /// Must not be called while queue data is pending; check
    /// [`Writer::queued`] first.
    pub fn into_queue(self) -> Option<Vec<u8>> {
        self.queue
    }

    /// Queue bytes pending to be drained into the next buffer.
    pub fn queued(&self) -> usize {
        self.queue_remaining
    }

    /// True if an output buffer is currently attached.
    pub fn is_attached(&self) -> bool {
        self.out.is_some()
    }

    /// Hands an output buffer to the writer.
    ///
    /// Pending queue data is drained into the front of the buffer first; see
    /// [`Feed`] for the possible outcomes.
    pub fn feed(&mut self, mut out: BytesMut) -> Result<Feed, Error> {
        if self.out.is_some() {
            return Err(Error::UnexpectedOperation);
        }

        let mut copied = 0;
        if let Some(queue) = &self.queue {
            if self.queue_remaining > 0 {
                copied = self.queue_remaining.min(out.len());
                out[..copied].copy_from_slice(&queue[self.queue_next..self.queue_next + copied]);

                if copied < self.queue_remaining {
                    self.queue_next += copied;
                    self.queue_remaining -= copied;
                    return Ok(Feed::Filled(out));
                }
                self.queue_next = 0;
                self.queue_remaining = 0;
            }
        }

        self.out = Some(out);
        self.commit = copied;
        self.end = copied;
        Ok(Feed::Open)
    }

    /// Obtains a writable span of exactly `desired` bytes.
    pub fn get(&mut self, desired: usize) -> Result<&mut [u8], Error> {
        self.get_inner(desired, true)
    }

    /// Obtains a writable span of up to `desired` bytes.
    pub fn get_up_to(&mut self, desired: usize) -> Result<&mut [u8], Error> {
        self.get_inner(desired, false)
    }

    fn get_inner(&mut self, mut desired: usize, exact: bool) -> Result<&mut [u8], Error> {
        let out = self.out.as_mut().ok_or(Error::UnexpectedOperation)?;
        let ol = out.len();
        let end = self.end;

        // Already serving from the queue?
        if end > ol {
            let Some(queue) = self.queue.as_mut() else {
                return Err(Error::OutOfData);
            };
            let ql = queue.len();
            let qo = self.queue_next + (end - ol);
            if ql - qo < desired {
                if exact {
                    return Err(Error::OutOfData);
                }
                desired = ql - qo;
                if desired == 0 {
                    return Err(Error::OutOfData);
                }
            }
            self.end = end + desired;
            return Ok(&mut queue[qo..qo + desired]);
        }

        let remaining = ol - end;
        if remaining < desired {
            // Transition into the queue if one is present and actually
            // larger than what the buffer still offers.
            match self.queue.as_mut() {
                Some(queue) if queue.len() > remaining => {
                    let ql = queue.len();
                    if !exact && desired > ql {
                        desired = ql;
                    }
                    if desired > ql {
                        return Err(Error::OutOfData);
                    }
                    self.end = end + desired;
                    self.queue_next = remaining;
                    return Ok(&mut queue[..desired]);
                }
                _ => {
                    if exact {
                        return Err(Error::OutOfData);
                    }
                    desired = remaining;
                    if desired == 0 {
                        return Err(Error::OutOfData);
                    }
                }
            }
        }

        self.end = end + desired;
        Ok(&mut out[end..end + desired])
    }

    /// Marks everything fetched so far as produced.
    pub fn commit(&mut self) -> Result<(), Error> {
        self.commit_partial(0)
    }

    /// Marks everything fetched so far except the trailing `omit` bytes as
    /// produced.
    ///
    /// If the committed region extends from the output buffer into the
    /// queue, the overlapping queue prefix is copied back into the buffer
    /// tail so the buffer leaves the writer fully populated.
    pub fn commit_partial(&mut self, omit: usize) -> Result<(), Error> {
        let out = self.out.as_mut().ok_or(Error::UnexpectedOperation)?;
        let ol = out.len();
        let overlap = self.queue_next;

        if omit > self.end - self.commit {
            return Err(Error::InvalidArgs);
        }
        let to_commit = self.end - omit;

        if self.end > ol && self.commit < ol && to_commit > ol - overlap {
            let mut copy = to_commit - (ol - overlap);
            if copy > overlap {
                copy = overlap;
            }
            let queue = self.queue.as_ref().ok_or(Error::UnexpectedOperation)?;
            out[ol - overlap..ol - overlap + copy].copy_from_slice(&queue[..copy]);
        }

        if to_commit < ol {
            self.queue_next = 0;
        }
        self.end = to_commit;
        self.commit = to_commit;
        Ok(())
    }

    /// Committed byte count of the current buffer cycle.
    pub fn bytes_written(&self) -> Result<usize, Error> {
        if self.out.is_none() {
            return Err(Error::UnexpectedOperation);
        }
        Ok(self.commit)
    }

    /// Detaches the output buffer from the writer.
    ///
    /// With `force == false`, fails with [`Error::DataLeft`] when unused
    /// space remains in the buffer; the caller may keep the buffer open to
    /// merge further messages into it. Uncommitted fetches are rolled back
    /// in that case.
    pub fn reclaim(&mut self, force: bool) -> Result<Reclaimed, Error> {
        let ol = match &self.out {
            Some(out) => out.len(),
            None => return Err(Error::UnexpectedOperation),
        };

        let written;
        if self.commit <= ol {
            written = self.commit;
            self.queue_next = 0;
            if self.commit < ol && !force {
                self.end = self.commit;
                return Err(Error::DataLeft);
            }
        } else {
            self.queue_remaining = self.commit - ol;
            written = ol;
        }

        self.end = 0;
        self.commit = 0;
        let Some(out) = self.out.take() else {
            return Err(Error::UnexpectedOperation);
        };
        Ok(Reclaimed {
            out,
            written,
            queued: self.queue_remaining,
        })
    }
}
