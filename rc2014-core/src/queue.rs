//! Bounded byte queues used by every output-producing peripheral.
//!
//! Producers push whole messages now; the emulated CPU drains them one byte
//! per receive poll.

use std::collections::VecDeque;

use tracing::warn;

use crate::error::QueueError;

/// Default capacity of every peripheral queue.
pub const QUEUE_CAPACITY: usize = 1024;

/// Most bytes held back behind a full queue. Anything beyond is dropped.
pub const DEFERRED_LIMIT: usize = 64 * 1024;

/// Bounded FIFO of bytes.
#[derive(Debug, Clone)]
pub struct ByteQueue {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a single byte. Fails with `Full` without touching the contents.
    pub fn push(&mut self, byte: u8) -> Result<(), QueueError> {
        if self.is_full() {
            return Err(QueueError::Full);
        }
        self.buf.push_back(byte);
        Ok(())
    }

    /// Push all of `bytes` or none of them.
    pub fn push_slice(&mut self, bytes: &[u8]) -> Result<(), QueueError> {
        if bytes.len() > self.space() {
            return Err(QueueError::Full);
        }
        self.buf.extend(bytes.iter().copied());
        Ok(())
    }

    /// Pop the oldest byte.
    pub fn pop(&mut self) -> Result<u8, QueueError> {
        self.buf.pop_front().ok_or(QueueError::NotAvailable)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free space in bytes.
    pub fn space(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// A [`ByteQueue`] with an ordered overflow tail.
///
/// Bytes that do not fit are held back and moved into the queue by
/// [`Spool::pump`] as the consumer frees space, so one-shot responses larger
/// than the queue are delayed rather than lost. The tail holds at most
/// [`DEFERRED_LIMIT`] bytes.
#[derive(Debug, Default)]
pub struct Spool {
    queue: ByteQueue,
    deferred: VecDeque<u8>,
}

impl Spool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: ByteQueue::with_capacity(capacity),
            deferred: VecDeque::new(),
        }
    }

    /// Queue `bytes` after everything already written.
    pub fn write(&mut self, bytes: &[u8]) {
        self.deferred.extend(bytes.iter().copied());
        self.pump();
        if self.deferred.len() > DEFERRED_LIMIT {
            warn!(
                dropped = self.deferred.len() - DEFERRED_LIMIT,
                "spool overflow, bytes dropped"
            );
            self.deferred.truncate(DEFERRED_LIMIT);
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    /// Move deferred bytes into the queue while it has room.
    pub fn pump(&mut self) {
        while !self.queue.is_full() {
            match self.deferred.pop_front() {
                Some(b) => {
                    // Cannot fail: checked is_full above.
                    let _ = self.queue.push(b);
                }
                None => break,
            }
        }
    }

    pub fn pop(&mut self) -> Result<u8, QueueError> {
        let byte = self.queue.pop();
        self.pump();
        byte
    }

    /// True when no bytes are waiting behind the queue.
    pub fn is_caught_up(&self) -> bool {
        self.deferred.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.deferred.is_empty()
    }

    pub fn queue(&self) -> &ByteQueue {
        &self.queue
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.deferred.clear();
    }

    /// Drain everything queued or deferred. Test and host convenience.
    pub fn drain_all(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.queue.len() + self.deferred.len());
        while let Ok(b) = self.pop() {
            out.push(b);
        }
        out
    }
}
