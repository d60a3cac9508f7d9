//! Outbound side of one backchannel direction.
//!
//! Messages and file bodies are queued as segments behind a bounded
//! [`ByteQueue`]. Each poll moves as much as fits, in order, so a large file
//! never overflows the queue and text queued after a file body never
//! overtakes it.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use tracing::warn;

use crate::queue::{ByteQueue, DEFERRED_LIMIT};

const FEED_CHUNK: usize = 256;

/// How a file body is written into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Bytes are copied as-is.
    Verbatim,
    /// Any run of CR/LF becomes a single `LF CR`, as if typed at a keyboard.
    Typed,
}

/// A file being streamed into an outbox.
pub struct FileFeed {
    reader: Box<dyn Read + Send>,
    mode: FeedMode,
    in_terminator: bool,
    trailer: Vec<u8>,
    notice: Option<String>,
}

impl FileFeed {
    pub fn new(reader: Box<dyn Read + Send>, mode: FeedMode) -> Self {
        Self {
            reader,
            mode,
            in_terminator: false,
            trailer: Vec::new(),
            notice: None,
        }
    }

    /// Bytes queued immediately after the file body.
    pub fn with_trailer(mut self, trailer: &[u8]) -> Self {
        self.trailer = trailer.to_vec();
        self
    }

    /// Message reported by [`Outbox::pump`] once the body has been queued.
    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }

    /// Move one chunk into `queue`. Returns false at end of file.
    fn fill(&mut self, queue: &mut ByteQueue) -> bool {
        // Typed mode may expand one input byte into two.
        let per_byte = match self.mode {
            FeedMode::Verbatim => 1,
            FeedMode::Typed => 2,
        };
        let want = (queue.space() / per_byte).min(FEED_CHUNK);
        if want == 0 {
            return true;
        }

        let mut buf = [0u8; FEED_CHUNK];
        let n = loop {
            match self.reader.read(&mut buf[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "backchannel file read failed, ending transfer");
                    break 0;
                }
            }
        };
        if n == 0 {
            return false;
        }

        for &c in &buf[..n] {
            match self.mode {
                FeedMode::Verbatim => {
                    let _ = queue.push(c);
                }
                FeedMode::Typed => {
                    if c == b'\r' || c == b'\n' {
                        if !self.in_terminator {
                            self.in_terminator = true;
                            let _ = queue.push_slice(&[0x0a, 0x0d]);
                        }
                    } else {
                        self.in_terminator = false;
                        let _ = queue.push(c);
                    }
                }
            }
        }
        true
    }
}

enum Segment {
    Bytes(VecDeque<u8>),
    Feed(FileFeed),
}

/// Bounded output queue plus the ordered work waiting to enter it.
#[derive(Default)]
pub struct Outbox {
    queue: ByteQueue,
    pending: VecDeque<Segment>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes after everything already sent.
    ///
    /// At most [`DEFERRED_LIMIT`] bytes wait behind the queue; the excess is
    /// dropped.
    pub fn send(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        if self.pending.is_empty() {
            let n = rest.len().min(self.queue.space());
            // Cannot fail: n <= space.
            let _ = self.queue.push_slice(&rest[..n]);
            rest = &rest[n..];
        }

        let room = DEFERRED_LIMIT.saturating_sub(self.deferred_len());
        if rest.len() > room {
            warn!(dropped = rest.len() - room, "backchannel outbox overflow, bytes dropped");
            rest = &rest[..room];
        }
        if rest.is_empty() {
            return;
        }
        match self.pending.back_mut() {
            Some(Segment::Bytes(tail)) => tail.extend(rest.iter().copied()),
            _ => self
                .pending
                .push_back(Segment::Bytes(rest.iter().copied().collect())),
        }
    }

    fn deferred_len(&self) -> usize {
        self.pending
            .iter()
            .map(|s| match s {
                Segment::Bytes(bytes) => bytes.len(),
                Segment::Feed(_) => 0,
            })
            .sum()
    }

    pub fn send_str(&mut self, s: &str) {
        self.send(s.as_bytes());
    }

    /// Queue a file body after everything already sent.
    pub fn send_file(&mut self, feed: FileFeed) {
        self.pending.push_back(Segment::Feed(feed));
    }

    /// Move pending work into the queue while it has room.
    ///
    /// Returns the notices of file feeds that finished during this call.
    pub fn pump(&mut self) -> Vec<String> {
        let mut notices = Vec::new();

        while !self.queue.is_full() {
            let finished = match self.pending.front_mut() {
                None => break,
                Some(Segment::Bytes(bytes)) => {
                    while !self.queue.is_full() {
                        match bytes.pop_front() {
                            Some(b) => {
                                let _ = self.queue.push(b);
                            }
                            None => break,
                        }
                    }
                    bytes.is_empty()
                }
                Some(Segment::Feed(feed)) => {
                    let before = self.queue.space();
                    let more = feed.fill(&mut self.queue);
                    if more && self.queue.space() == before {
                        // Not enough room for the next expansion; retry next poll.
                        break;
                    }
                    !more
                }
            };

            if finished {
                if let Some(Segment::Feed(feed)) = self.pending.pop_front() {
                    notices.extend(feed.notice);
                    if !feed.trailer.is_empty() {
                        self.pending
                            .push_front(Segment::Bytes(feed.trailer.into_iter().collect()));
                    }
                }
            }
        }

        notices
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.queue.pop().ok()
    }

    /// True if a byte is ready to be read.
    pub fn has_data(&self) -> bool {
        !self.queue.is_empty()
    }

    /// True if nothing is queued or pending.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.pending.is_empty()
    }

    /// True while a file body is still being streamed.
    pub fn is_streaming(&self) -> bool {
        self.pending.iter().any(|s| matches!(s, Segment::Feed(_)))
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }

    /// Pump and drain everything. Test and host convenience.
    pub fn drain_all(&mut self) -> (Vec<u8>, Vec<String>) {
        let mut out = Vec::new();
        let mut notices = Vec::new();
        loop {
            notices.extend(self.pump());
            match self.pop() {
                Some(b) => out.push(b),
                None if self.pending.is_empty() => break,
                None => {}
            }
        }
        (out, notices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QUEUE_CAPACITY;
    use std::io::Cursor;

    fn feed(data: &[u8], mode: FeedMode) -> FileFeed {
        FileFeed::new(Box::new(Cursor::new(data.to_vec())), mode)
    }

    #[test]
    fn test_typed_collapses_crlf() {
        let mut out = Outbox::new();
        out.send_file(feed(b"10 PRINT \"A\"\r\n20 END\n", FeedMode::Typed));
        let (bytes, _) = out.drain_all();
        assert_eq!(bytes, b"10 PRINT \"A\"\n\r20 END\n\r");
    }

    #[test]
    fn test_typed_collapses_runs_of_terminators() {
        let mut out = Outbox::new();
        out.send_file(feed(b"A\n\r\n\rB\rC", FeedMode::Typed));
        let (bytes, _) = out.drain_all();
        assert_eq!(bytes, b"A\n\rB\n\rC");
    }

    #[test]
    fn test_verbatim_keeps_bytes() {
        let mut out = Outbox::new();
        out.send_file(feed(b"x\r\ny\n", FeedMode::Verbatim));
        let (bytes, _) = out.drain_all();
        assert_eq!(bytes, b"x\r\ny\n");
    }

    #[test]
    fn test_trailer_and_notice_follow_body() {
        let mut out = Outbox::new();
        out.send(b"new\n");
        out.send_file(
            feed(b"10 END\n", FeedMode::Typed)
                .with_trailer(b"run\n")
                .with_notice("Done!\n"),
        );
        out.send(b"after\n");
        let (bytes, notices) = out.drain_all();
        assert_eq!(bytes, b"new\n10 END\n\rrun\nafter\n");
        assert_eq!(notices, vec!["Done!\n".to_string()]);
    }

    #[test]
    fn test_large_file_never_overflows_queue() {
        let data: Vec<u8> = (0..5000u32).map(|i| b'a' + (i % 26) as u8).collect();
        let mut out = Outbox::new();
        out.send_file(feed(&data, FeedMode::Verbatim));

        out.pump();
        assert!(out.queue.len() <= out.queue.capacity());
        assert!(out.is_streaming());

        let (bytes, _) = out.drain_all();
        assert_eq!(bytes, data);
        assert!(out.is_idle());
    }

    #[test]
    fn test_send_overflow_is_deferred_not_lost() {
        let mut out = Outbox::new();
        let big = vec![b'z'; 3000];
        out.send(&big);
        assert_eq!(out.queue.len(), 1024);
        let (bytes, _) = out.drain_all();
        assert_eq!(bytes.len(), 3000);
    }

    #[test]
    fn test_send_overflow_is_capped() {
        let mut out = Outbox::new();
        out.send(&vec![b'a'; QUEUE_CAPACITY + DEFERRED_LIMIT]);
        out.send(b"lost");
        let (bytes, _) = out.drain_all();
        assert_eq!(bytes.len(), QUEUE_CAPACITY + DEFERRED_LIMIT);
        assert!(bytes.iter().all(|&b| b == b'a'));

        // Room again once drained.
        out.send(b"ok");
        assert_eq!(out.drain_all().0, b"ok");
    }
}
