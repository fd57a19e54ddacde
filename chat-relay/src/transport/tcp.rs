use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
};

use anyhow::{Context, Result};
use tracing::debug;

use super::{Acceptor, ByteSource, Connection, ReadOutcome, closed_error, hang_up_error};

const READ_CHUNK: usize = 4096;

/// Non-blocking listening socket.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Binds through tokio, then hands the socket back to std in non-blocking
    /// mode so `accept` can be polled from a synchronous pass.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let listener = listener.into_std().context("failed to detach listener")?;
        listener
            .set_nonblocking(true)
            .context("failed to make listener non-blocking")?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Acceptor for TcpAcceptor {
    type Connection = TcpConnection;

    fn accept(&mut self) -> io::Result<Option<TcpConnection>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                if let Err(error) = stream.set_nodelay(true) {
                    debug!(%peer, ?error, "failed to disable nagle");
                }
                Ok(Some(TcpConnection::from_stream(stream, Some(peer))))
            }
            Err(err) if would_block(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Non-blocking TCP stream with a small read-ahead buffer.
///
/// The framer pulls one byte at a time; the read-ahead keeps that from
/// turning into one syscall per byte.
pub struct TcpConnection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    inbound: Vec<u8>,
    cursor: usize,
    closed: bool,
}

impl TcpConnection {
    fn from_stream(stream: TcpStream, peer: Option<SocketAddr>) -> Self {
        Self {
            stream,
            peer,
            inbound: Vec::with_capacity(READ_CHUNK),
            cursor: 0,
            closed: false,
        }
    }

    /// Connects to `target` (anything `ToSocketAddrs` accepts as a string,
    /// e.g. `127.0.0.1:5000` or `localhost:5000`).
    pub async fn connect(target: &str) -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(target)
            .await
            .with_context(|| format!("failed to connect to {target}"))?;
        let peer = stream.peer_addr().ok();
        let stream = stream.into_std().context("failed to detach stream")?;
        stream
            .set_nonblocking(true)
            .context("failed to make stream non-blocking")?;
        if let Err(error) = stream.set_nodelay(true) {
            debug!(?error, "failed to disable nagle");
        }
        Ok(Self::from_stream(stream, peer))
    }

    fn refill(&mut self) -> ReadOutcome {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return ReadOutcome::Failed(hang_up_error()),
                Ok(n) => {
                    self.inbound.clear();
                    self.inbound.extend_from_slice(&chunk[..n]);
                    self.cursor = 0;
                    return ReadOutcome::Data(n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if would_block(&err) => return ReadOutcome::NoData,
                Err(err) => return ReadOutcome::Failed(err),
            }
        }
    }
}

impl ByteSource for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        if self.closed {
            return ReadOutcome::Failed(closed_error());
        }
        if buf.is_empty() {
            return ReadOutcome::NoData;
        }
        if self.cursor == self.inbound.len() {
            match self.refill() {
                ReadOutcome::Data(_) => {}
                other => return other,
            }
        }

        let available = &self.inbound[self.cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        ReadOutcome::Data(n)
    }
}

impl Connection for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }

        let mut written = 0;
        while written < buf.len() {
            match self.stream.write(&buf[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if would_block(&err) => break,
                Err(err) if written == 0 => return Err(err),
                Err(err) => {
                    debug!(?err, written, "write failed part way through");
                    break;
                }
            }
        }
        Ok(written)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(error) = self.stream.shutdown(Shutdown::Both) {
            debug!(peer = ?self.peer, ?error, "shutdown on close failed");
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn read_eventually(conn: &mut TcpConnection, buf: &mut [u8]) -> ReadOutcome {
        for _ in 0..200 {
            match conn.read(buf) {
                ReadOutcome::NoData => tokio::time::sleep(Duration::from_millis(5)).await,
                other => return other,
            }
        }
        ReadOutcome::NoData
    }

    async fn accept_eventually(acceptor: &mut TcpAcceptor) -> TcpConnection {
        for _ in 0..200 {
            if let Some(conn) = acceptor.accept().expect("accept") {
                return conn;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no connection arrived");
    }

    #[tokio::test]
    async fn accept_returns_none_without_pending_clients() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        assert!(acceptor.accept().expect("accept").is_none());
    }

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let addr = acceptor.local_addr().expect("local addr");

        let mut client = TcpConnection::connect(&addr.to_string())
            .await
            .expect("connect");
        let mut server_side = accept_eventually(&mut acceptor).await;
        assert!(server_side.peer_addr().is_some());

        assert_eq!(client.write(b"hi\n").expect("write"), 3);

        let mut byte = [0u8; 1];
        let mut received = Vec::new();
        while received.len() < 3 {
            match read_eventually(&mut server_side, &mut byte).await {
                ReadOutcome::Data(1) => received.push(byte[0]),
                other => panic!("unexpected read outcome: {other:?}"),
            }
        }
        assert_eq!(received, b"hi\n");
        assert!(matches!(server_side.read(&mut byte), ReadOutcome::NoData));
    }

    #[tokio::test]
    async fn peer_hang_up_reads_as_failure() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let addr = acceptor.local_addr().expect("local addr");

        let mut client = TcpConnection::connect(&addr.to_string())
            .await
            .expect("connect");
        let mut server_side = accept_eventually(&mut acceptor).await;

        client.close();

        let mut byte = [0u8; 1];
        match read_eventually(&mut server_side, &mut byte).await {
            ReadOutcome::Failed(err) => assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_connection_rejects_io() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let addr = acceptor.local_addr().expect("local addr");

        let mut client = TcpConnection::connect(&addr.to_string())
            .await
            .expect("connect");
        client.close();
        client.close();

        assert!(client.write(b"x\n").is_err());
        assert!(matches!(client.read(&mut [0u8; 1]), ReadOutcome::Failed(_)));
    }
}
