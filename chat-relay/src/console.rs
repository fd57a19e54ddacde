//! Non-blocking view of the process's standard input.
//!
//! Stdin has no portable non-blocking mode, so a detached thread does the
//! blocking reads and forwards chunks over a channel. The thread is a plain
//! std thread rather than a tokio blocking task so that it never holds up
//! runtime shutdown while parked in `read`.

use std::{
    io::{self, Read},
    thread,
};

use tokio::sync::mpsc::{self, UnboundedReceiver, error::TryRecvError};
use tracing::debug;

use crate::transport::{ByteSource, ReadOutcome};

const CHUNK: usize = 1024;

pub struct Console {
    chunks: UnboundedReceiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    cursor: usize,
    finished: Option<io::ErrorKind>,
}

impl Console {
    /// Starts reading the process's stdin in the background.
    pub fn spawn() -> Self {
        Self::from_reader(io::stdin())
    }

    /// Reads `reader` on a background thread until it ends or fails.
    pub fn from_reader<R>(mut reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, chunks) = mpsc::unbounded_channel();
        let spawned = thread::Builder::new()
            .name("console-reader".into())
            .spawn(move || {
                let mut buf = [0u8; CHUNK];
                loop {
                    let message = match reader.read(&mut buf) {
                        Ok(0) => Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "console input closed",
                        )),
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => Err(err),
                    };
                    let stop = message.is_err();
                    if tx.send(message).is_err() || stop {
                        break;
                    }
                }
            });

        let finished = match spawned {
            Ok(_) => None,
            Err(err) => {
                debug!(error = ?err, "failed to start console reader");
                Some(err.kind())
            }
        };

        Self {
            chunks,
            pending: Vec::new(),
            cursor: 0,
            finished,
        }
    }

    fn failure(kind: io::ErrorKind) -> ReadOutcome {
        ReadOutcome::Failed(io::Error::new(kind, "console input unavailable"))
    }
}

impl ByteSource for Console {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        if self.cursor == self.pending.len() {
            if let Some(kind) = self.finished {
                return Self::failure(kind);
            }
            match self.chunks.try_recv() {
                Ok(Ok(chunk)) => {
                    self.pending = chunk;
                    self.cursor = 0;
                }
                Ok(Err(err)) => {
                    self.finished = Some(err.kind());
                    return ReadOutcome::Failed(err);
                }
                Err(TryRecvError::Empty) => return ReadOutcome::NoData,
                Err(TryRecvError::Disconnected) => {
                    self.finished = Some(io::ErrorKind::BrokenPipe);
                    return Self::failure(io::ErrorKind::BrokenPipe);
                }
            }
        }

        if buf.is_empty() || self.cursor == self.pending.len() {
            return ReadOutcome::NoData;
        }
        let available = &self.pending[self.cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        ReadOutcome::Data(n)
    }
}
