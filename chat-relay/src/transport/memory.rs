//! In-memory transport for driving the relay and dialogue deterministically.
//!
//! A [`MemoryConnection`] is the end the loops own; the paired
//! [`MemoryPeer`] is the remote side a test (or a local harness) controls. The
//! peer can feed bytes, collect what was written, and inject the failures the
//! relay has to survive: broken reads, broken writes, short writes and
//! hang-ups. The peer is itself a [`Connection`], so a client dialogue can sit
//! on the far end of a connection the server accepted.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{Acceptor, ByteSource, Connection, ReadOutcome, closed_error, hang_up_error};

#[derive(Debug, Default)]
struct Link {
    to_local: VecDeque<u8>,
    to_remote: Vec<u8>,
    remote_hung_up: bool,
    read_fault: bool,
    write_fault: bool,
    write_limit: Option<usize>,
    closed: bool,
}

type SharedLink = Arc<Mutex<Link>>;

fn lock(link: &SharedLink) -> MutexGuard<'_, Link> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates a connected pair: the local connection and its remote controller.
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let link = SharedLink::default();
    (
        MemoryConnection {
            link: Arc::clone(&link),
        },
        MemoryPeer { link },
    )
}

/// The locally owned end of an in-memory link.
#[derive(Debug)]
pub struct MemoryConnection {
    link: SharedLink,
}

impl ByteSource for MemoryConnection {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let mut link = lock(&self.link);
        if link.closed {
            return ReadOutcome::Failed(closed_error());
        }
        if link.read_fault {
            return ReadOutcome::Failed(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected read failure",
            ));
        }
        if link.to_local.is_empty() {
            if link.remote_hung_up {
                return ReadOutcome::Failed(hang_up_error());
            }
            return ReadOutcome::NoData;
        }
        if buf.is_empty() {
            return ReadOutcome::NoData;
        }

        let n = buf.len().min(link.to_local.len());
        for (slot, byte) in buf.iter_mut().zip(link.to_local.drain(..n)) {
            *slot = byte;
        }
        ReadOutcome::Data(n)
    }
}

impl Connection for MemoryConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut link = lock(&self.link);
        if link.closed {
            return Err(closed_error());
        }
        if link.write_fault {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            ));
        }

        let accepted = link.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        link.to_remote.extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn close(&mut self) {
        lock(&self.link).closed = true;
    }
}

/// Remote-side controller for a [`MemoryConnection`].
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    link: SharedLink,
}

impl MemoryPeer {
    /// Queues bytes for the local end to read.
    pub fn send(&self, bytes: impl AsRef<[u8]>) {
        lock(&self.link).to_local.extend(bytes.as_ref());
    }

    /// Drains everything the local end has written so far.
    pub fn take_received(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.link).to_remote)
    }

    /// Like [`take_received`](Self::take_received), decoded lossily.
    pub fn take_text(&self) -> String {
        String::from_utf8_lossy(&self.take_received()).into_owned()
    }

    /// Closes the remote side: queued bytes still drain, then reads fail.
    pub fn hang_up(&self) {
        lock(&self.link).remote_hung_up = true;
    }

    pub fn break_reads(&self) {
        lock(&self.link).read_fault = true;
    }

    pub fn break_writes(&self) {
        lock(&self.link).write_fault = true;
    }

    /// Caps every subsequent write at `limit` bytes.
    pub fn short_writes(&self, limit: usize) {
        lock(&self.link).write_limit = Some(limit);
    }

    /// Whether the local end has been closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.link).closed
    }
}

impl ByteSource for MemoryPeer {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let mut link = lock(&self.link);
        if link.remote_hung_up {
            return ReadOutcome::Failed(closed_error());
        }
        if link.to_remote.is_empty() {
            if link.closed {
                return ReadOutcome::Failed(hang_up_error());
            }
            return ReadOutcome::NoData;
        }
        if buf.is_empty() {
            return ReadOutcome::NoData;
        }

        let n = buf.len().min(link.to_remote.len());
        for (slot, byte) in buf.iter_mut().zip(link.to_remote.drain(..n)) {
            *slot = byte;
        }
        ReadOutcome::Data(n)
    }
}

impl Connection for MemoryPeer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut link = lock(&self.link);
        if link.remote_hung_up {
            return Err(closed_error());
        }
        if link.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "local end closed the connection",
            ));
        }
        link.to_local.extend(buf);
        Ok(buf.len())
    }

    /// Same as [`hang_up`](MemoryPeer::hang_up).
    fn close(&mut self) {
        self.hang_up();
    }
}

/// Creates an acceptor together with the handle used to dial into it.
pub fn listener() -> (MemoryAcceptor, MemoryConnector) {
    let pending = Arc::new(Mutex::new(VecDeque::new()));
    (
        MemoryAcceptor {
            pending: Arc::clone(&pending),
        },
        MemoryConnector { pending },
    )
}

type Backlog = Arc<Mutex<VecDeque<MemoryConnection>>>;

/// Accepts connections queued by a [`MemoryConnector`], oldest first.
#[derive(Debug)]
pub struct MemoryAcceptor {
    pending: Backlog,
}

impl Acceptor for MemoryAcceptor {
    type Connection = MemoryConnection;

    fn accept(&mut self) -> io::Result<Option<MemoryConnection>> {
        Ok(self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    pending: Backlog,
}

impl MemoryConnector {
    /// Queues a new inbound connection and returns its remote controller.
    pub fn connect(&self) -> MemoryPeer {
        let (connection, peer) = pair();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(connection);
        peer
    }
}
