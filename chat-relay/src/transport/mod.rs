//! Byte-level transport consumed by the relay and the client dialogue.
//!
//! Everything above this module talks to connections through three small
//! traits so the same loops can run over real sockets ([`tcp`]) or over the
//! scripted in-memory pipes in [`memory`].
//!
//! Reads are tri-state: bytes arrived, nothing is available right now, or the
//! endpoint failed. End of stream counts as a failure, which is how the
//! server eventually notices a client that went away without saying so.

use std::{io, net::SocketAddr};

pub mod memory;
pub mod tcp;

/// Result of a single non-blocking read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes (always at least one) were copied into the caller's buffer.
    Data(usize),
    /// Nothing is available yet; try again on a later pass.
    NoData,
    /// The source is unusable. Includes the peer closing its side.
    Failed(io::Error),
}

/// Anything that can be polled for bytes without blocking.
pub trait ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome;
}

/// A duplex byte stream to one peer.
pub trait Connection: ByteSource {
    /// Writes as much of `buf` as the transport accepts and reports how many
    /// bytes went out. A count short of `buf.len()` is not an error here;
    /// callers decide what a partial write means to them.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Tears the connection down. Further reads fail and further writes error.
    fn close(&mut self);

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Source of inbound connections.
pub trait Acceptor {
    type Connection: Connection;

    /// Returns the next pending connection, or `None` when nobody is waiting.
    fn accept(&mut self) -> io::Result<Option<Self::Connection>>;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        (**self).read(buf)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        (**self).read(buf)
    }
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection already closed")
}

pub(crate) fn hang_up_error() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection")
}
