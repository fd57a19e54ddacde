//! Newline framing over a non-blocking [`ByteSource`].

use std::io;

use crate::transport::{ByteSource, ReadOutcome};

/// Largest message on the wire, terminator included.
pub const MAX_TEXT_SIZE: usize = 1000;

pub const TERMINATOR: u8 = b'\n';

/// What happens when a line hits the buffer bound before a newline shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// At `capacity` bytes the final byte is replaced with the terminator.
    OverwriteLast,
    /// At `capacity - 1` bytes a terminator is appended.
    AppendTerminator,
}

/// One in-progress or completed line, bounded by its capacity.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    overflow: Overflow,
}

impl LineBuffer {
    /// Buffer for bytes arriving off the wire.
    pub fn new(capacity: usize) -> Self {
        Self::with_overflow(capacity, Overflow::OverwriteLast)
    }

    /// Buffer for lines composed from local input.
    pub fn for_input(capacity: usize) -> Self {
        Self::with_overflow(capacity, Overflow::AppendTerminator)
    }

    pub fn with_overflow(capacity: usize, overflow: Overflow) -> Self {
        // Appending needs room for one byte of text plus the terminator.
        let floor = match overflow {
            Overflow::OverwriteLast => 1,
            Overflow::AppendTerminator => 2,
        };
        let capacity = capacity.max(floor);
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            overflow,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Hands out the buffered line and leaves the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::replace(&mut self.bytes, Vec::with_capacity(self.capacity))
    }

    /// Appends one byte, returning `true` once the line is complete.
    fn push(&mut self, byte: u8) -> bool {
        self.bytes.push(byte);
        if byte == TERMINATOR {
            return true;
        }

        match self.overflow {
            Overflow::OverwriteLast if self.bytes.len() >= self.capacity => {
                if let Some(last) = self.bytes.last_mut() {
                    *last = TERMINATOR;
                }
                true
            }
            Overflow::AppendTerminator if self.bytes.len() >= self.capacity - 1 => {
                self.bytes.push(TERMINATOR);
                true
            }
            _ => false,
        }
    }
}

/// Outcome of one framing attempt.
#[derive(Debug)]
pub enum Frame {
    /// The buffer holds a full line ending in the terminator.
    Complete,
    /// The source ran dry before the line finished; partial bytes are kept.
    Pending,
    /// The source failed; `discarded` partial bytes were thrown away.
    Failed { error: io::Error, discarded: usize },
}

/// Pulls bytes from `source` one at a time into `buffer` until a line
/// completes, the source has nothing more to give, or it fails.
pub fn frame_line<S>(source: &mut S, buffer: &mut LineBuffer) -> Frame
where
    S: ByteSource + ?Sized,
{
    let mut byte = [0u8; 1];
    loop {
        match source.read(&mut byte) {
            ReadOutcome::Data(0) | ReadOutcome::NoData => return Frame::Pending,
            ReadOutcome::Data(_) => {
                if buffer.push(byte[0]) {
                    return Frame::Complete;
                }
            }
            ReadOutcome::Failed(error) => {
                let discarded = buffer.len();
                buffer.clear();
                return Frame::Failed { error, discarded };
            }
        }
    }
}

/// A line carrying no text: nothing but the terminator, or nothing at all.
pub fn is_blank(line: &[u8]) -> bool {
    matches!(line, [] | [TERMINATOR])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;

    #[test]
    fn frames_a_single_line_and_leaves_the_rest() {
        let (mut conn, peer) = memory::pair();
        peer.send("hello\nworld");

        let mut buffer = LineBuffer::new(MAX_TEXT_SIZE);
        assert!(matches!(frame_line(&mut conn, &mut buffer), Frame::Complete));
        assert_eq!(buffer.take(), b"hello\n");
        assert!(buffer.is_empty());

        assert!(matches!(frame_line(&mut conn, &mut buffer), Frame::Pending));
        assert_eq!(buffer.as_bytes(), b"world");
    }

    #[test]
    fn partial_lines_resume_on_the_next_call() {
        let (mut conn, peer) = memory::pair();
        let mut buffer = LineBuffer::new(MAX_TEXT_SIZE);

        peer.send("hel");
        assert!(matches!(frame_line(&mut conn, &mut buffer), Frame::Pending));
        peer.send("lo\n");
        assert!(matches!(frame_line(&mut conn, &mut buffer), Frame::Complete));
        assert_eq!(buffer.as_bytes(), b"hello\n");
    }

    #[test]
    fn overwrite_policy_replaces_the_last_byte_at_the_bound() {
        let (mut conn, peer) = memory::pair();
        peer.send(vec![b'a'; MAX_TEXT_SIZE + 5]);

        let mut buffer = LineBuffer::new(MAX_TEXT_SIZE);
        assert!(matches!(frame_line(&mut conn, &mut buffer), Frame::Complete));
        let line = buffer.take();
        assert_eq!(line.len(), MAX_TEXT_SIZE);
        assert_eq!(line[MAX_TEXT_SIZE - 1], TERMINATOR);
        assert!(line[..MAX_TEXT_SIZE - 1].iter().all(|b| *b == b'a'));

        // The overflow starts the next line.
        assert!(matches!(frame_line(&mut conn, &mut buffer), Frame::Pending));
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn append_policy_keeps_every_byte_and_adds_a_terminator() {
        let (mut conn, peer) = memory::pair();
        peer.send(vec![b'z'; MAX_TEXT_SIZE]);

        let mut buffer = LineBuffer::for_input(MAX_TEXT_SIZE);
        assert!(matches!(frame_line(&mut conn, &mut buffer), Frame::Complete));
        let line = buffer.take();
        assert_eq!(line.len(), MAX_TEXT_SIZE);
        assert_eq!(line.last(), Some(&TERMINATOR));
        assert_eq!(line.iter().filter(|b| **b == b'z').count(), MAX_TEXT_SIZE - 1);
    }

    #[test]
    fn read_failure_discards_partial_content() {
        let (mut conn, peer) = memory::pair();
        let mut buffer = LineBuffer::new(MAX_TEXT_SIZE);

        peer.send("half a li");
        assert!(matches!(frame_line(&mut conn, &mut buffer), Frame::Pending));
        peer.break_reads();
        assert!(matches!(
            frame_line(&mut conn, &mut buffer),
            Frame::Failed { discarded: 9, .. }
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn tiny_capacities_are_raised_to_a_usable_floor() {
        assert_eq!(LineBuffer::new(0).capacity(), 1);
        assert_eq!(LineBuffer::for_input(1).capacity(), 2);
    }

    #[test]
    fn blank_lines() {
        assert!(is_blank(b""));
        assert!(is_blank(b"\n"));
        assert!(!is_blank(b" \n"));
        assert!(!is_blank(b".\n"));
    }
}
