use std::{
    io::{self, Write},
    time::Duration,
};

use anyhow::Result;
use thiserror::Error;
use tokio::{
    select,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    console::Console,
    framer::{Frame, LineBuffer, MAX_TEXT_SIZE, frame_line, is_blank},
    transport::{ByteSource, Connection, tcp::TcpConnection},
};

/// Typing this line on its own leaves the chat.
pub const SENTINEL: &[u8] = b".\n";

/// How a dialogue ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The user typed the sentinel.
    Sentinel,
    /// Local input reached end of file.
    InputClosed,
    /// Ctrl-c.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Continue,
    Exit(ExitReason),
}

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("server shutdown")]
    ServerShutdown(#[source] io::Error),
    #[error("error while reading from stdin")]
    LocalInput(#[source] io::Error),
    #[error("something wrong with server")]
    Send(#[source] io::Error),
    #[error("failed to write to local output")]
    LocalOutput(#[source] io::Error),
}

/// A client's conversation with the relay over one connection.
///
/// Each [`pass`](Self::pass) first pulls whatever the server has sent,
/// printing completed lines, then pulls local input and sends any completed
/// line. Whenever a pass ends the dialogue, for whatever reason, the
/// connection has already been closed.
pub struct Dialogue<C, I, O> {
    connection: C,
    input: I,
    output: O,
    inbound: LineBuffer,
    outbound: LineBuffer,
}

impl<C, I, O> Dialogue<C, I, O>
where
    C: Connection,
    I: ByteSource,
    O: Write,
{
    pub fn new(connection: C, input: I, output: O, max_line: usize) -> Self {
        Self {
            connection,
            input,
            output,
            inbound: LineBuffer::new(max_line),
            outbound: LineBuffer::for_input(max_line),
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn pass(&mut self) -> Result<Pass, DialogueError> {
        let result = self.exchange();
        if !matches!(result, Ok(Pass::Continue)) {
            self.connection.close();
        }
        result
    }

    /// Ends the dialogue from outside a pass.
    pub fn interrupt(&mut self) -> ExitReason {
        self.connection.close();
        ExitReason::Interrupted
    }

    fn exchange(&mut self) -> Result<Pass, DialogueError> {
        self.receive()?;
        self.compose_and_send()
    }

    fn receive(&mut self) -> Result<(), DialogueError> {
        match frame_line(&mut self.connection, &mut self.inbound) {
            Frame::Pending => Ok(()),
            Frame::Complete => {
                let line = self.inbound.take();
                self.output
                    .write_all(&line)
                    .and_then(|()| self.output.flush())
                    .map_err(DialogueError::LocalOutput)
            }
            Frame::Failed { error, .. } => Err(DialogueError::ServerShutdown(error)),
        }
    }

    fn compose_and_send(&mut self) -> Result<Pass, DialogueError> {
        match frame_line(&mut self.input, &mut self.outbound) {
            Frame::Pending => Ok(Pass::Continue),
            Frame::Failed { error, discarded } if error.kind() == io::ErrorKind::UnexpectedEof => {
                if discarded > 0 {
                    debug!(discarded, "input closed mid-line; partial line not sent");
                }
                Ok(Pass::Exit(ExitReason::InputClosed))
            }
            Frame::Failed { error, .. } => Err(DialogueError::LocalInput(error)),
            Frame::Complete => {
                let line = self.outbound.take();
                if line == SENTINEL {
                    return Ok(Pass::Exit(ExitReason::Sentinel));
                }
                if is_blank(&line) {
                    return Ok(Pass::Continue);
                }
                self.send(&line).map(|()| Pass::Continue)
            }
        }
    }

    fn send(&mut self, line: &[u8]) -> Result<(), DialogueError> {
        match self.connection.write(line) {
            Ok(written) if written == line.len() => Ok(()),
            Ok(written) => Err(DialogueError::Send(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {written} of {} bytes", line.len()),
            ))),
            Err(err) => Err(DialogueError::Send(err)),
        }
    }
}

/// Runs passes on every tick until the dialogue ends or ctrl-c arrives.
pub async fn drive<C, I, O>(
    dialogue: &mut Dialogue<C, I, O>,
    poll_interval: Duration,
) -> Result<ExitReason, DialogueError>
where
    C: Connection,
    I: ByteSource,
    O: Write,
{
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        select! {
            ctrl_c = &mut ctrl_c => {
                handle_ctrl_c(ctrl_c);
                return Ok(dialogue.interrupt());
            }
            _ = ticker.tick() => {}
        }

        if let Pass::Exit(reason) = dialogue.pass()? {
            return Ok(reason);
        }
    }
}

/// Connects to the server named on the command line and chats over stdin
/// and stdout until the dialogue ends.
pub async fn run(args: ClientArgs) -> Result<()> {
    let target = args.target();
    let connection = TcpConnection::connect(&target).await?;
    write_stdout(&format!("*** connected to {target}"))?;

    let mut dialogue = Dialogue::new(connection, Console::spawn(), io::stdout(), MAX_TEXT_SIZE);
    match drive(&mut dialogue, args.poll_interval()).await {
        Ok(reason) => {
            write_stdout(farewell(reason))?;
            Ok(())
        }
        Err(DialogueError::ServerShutdown(err)) => {
            debug!(error = %err, "server connection lost");
            write_stdout("*** server shutdown")?;
            Ok(())
        }
        Err(err) => {
            write_stdout(&format!("*** {err}"))?;
            Err(err.into())
        }
    }
}

fn farewell(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::Sentinel => "*** exit from chatroom",
        ExitReason::InputClosed => "*** input closed; leaving chatroom",
        ExitReason::Interrupted => "*** interrupted; leaving chatroom",
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(line.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{self, MemoryConnection, MemoryPeer};

    struct Harness {
        dialogue: Dialogue<MemoryConnection, MemoryConnection, Vec<u8>>,
        server: MemoryPeer,
        keyboard: MemoryPeer,
    }

    fn harness() -> Harness {
        let (connection, server) = memory::pair();
        let (input, keyboard) = memory::pair();
        Harness {
            dialogue: Dialogue::new(connection, input, Vec::new(), MAX_TEXT_SIZE),
            server,
            keyboard,
        }
    }

    #[test]
    fn prints_server_lines_once_complete() {
        let mut h = harness();
        h.server.send("hel");
        assert_eq!(h.dialogue.pass().expect("pass"), Pass::Continue);
        assert!(h.dialogue.output().is_empty());

        h.server.send("lo\n");
        assert_eq!(h.dialogue.pass().expect("pass"), Pass::Continue);
        assert_eq!(h.dialogue.output(), b"hello\n");
    }

    #[test]
    fn sends_composed_lines() {
        let mut h = harness();
        h.keyboard.send("how are you?\n");
        assert_eq!(h.dialogue.pass().expect("pass"), Pass::Continue);
        assert_eq!(h.server.take_text(), "how are you?\n");
    }

    #[test]
    fn blank_input_is_not_sent() {
        let mut h = harness();
        h.keyboard.send("\n");
        assert_eq!(h.dialogue.pass().expect("pass"), Pass::Continue);
        assert!(h.server.take_received().is_empty());
        assert!(!h.server.is_closed());
    }

    #[test]
    fn sentinel_exits_without_sending() {
        let mut h = harness();
        h.keyboard.send(".\n");
        assert_eq!(
            h.dialogue.pass().expect("pass"),
            Pass::Exit(ExitReason::Sentinel)
        );
        assert!(h.server.take_received().is_empty());
        assert!(h.server.is_closed());
    }

    #[test]
    fn dot_with_more_text_is_an_ordinary_message() {
        let mut h = harness();
        h.keyboard.send("..\n");
        assert_eq!(h.dialogue.pass().expect("pass"), Pass::Continue);
        assert_eq!(h.server.take_text(), "..\n");
    }

    #[test]
    fn overlong_input_is_split_with_a_forced_terminator() {
        let mut h = harness();
        h.keyboard.send(vec![b'x'; MAX_TEXT_SIZE + 10]);
        h.keyboard.send("\n");

        h.dialogue.pass().expect("pass");
        let first = h.server.take_received();
        assert_eq!(first.len(), MAX_TEXT_SIZE);
        assert_eq!(first.last(), Some(&b'\n'));

        h.dialogue.pass().expect("pass");
        assert_eq!(h.server.take_received().len(), 12);
    }

    #[test]
    fn server_read_failure_ends_the_dialogue() {
        let mut h = harness();
        h.server.hang_up();
        let err = h.dialogue.pass().expect_err("server went away");
        assert!(matches!(err, DialogueError::ServerShutdown(_)));
        assert!(h.server.is_closed());
    }

    #[test]
    fn local_input_failure_ends_the_dialogue() {
        let mut h = harness();
        h.keyboard.break_reads();
        let err = h.dialogue.pass().expect_err("keyboard broke");
        assert!(matches!(err, DialogueError::LocalInput(_)));
        assert!(h.server.is_closed());
    }

    #[test]
    fn end_of_input_is_a_clean_exit() {
        let mut h = harness();
        h.keyboard.hang_up();
        assert_eq!(
            h.dialogue.pass().expect("pass"),
            Pass::Exit(ExitReason::InputClosed)
        );
        assert!(h.server.is_closed());
    }

    #[test]
    fn failed_send_ends_the_dialogue() {
        let mut h = harness();
        h.server.short_writes(1);
        h.keyboard.send("hello\n");
        let err = h.dialogue.pass().expect_err("short write");
        assert!(matches!(err, DialogueError::Send(_)));
        assert!(h.server.is_closed());
    }

    #[test]
    fn receive_happens_before_send_within_a_pass() {
        let mut h = harness();
        h.server.send("incoming\n");
        h.keyboard.send(".\n");
        assert_eq!(
            h.dialogue.pass().expect("pass"),
            Pass::Exit(ExitReason::Sentinel)
        );
        assert_eq!(h.dialogue.output(), b"incoming\n");
    }

    #[test]
    fn interrupt_closes_the_connection() {
        let mut h = harness();
        assert_eq!(h.dialogue.interrupt(), ExitReason::Interrupted);
        assert!(h.server.is_closed());
    }

    #[test]
    fn half_typed_line_is_dropped_when_input_closes() {
        let mut h = harness();
        h.keyboard.send("never fin");
        h.keyboard.hang_up();
        assert_eq!(
            h.dialogue.pass().expect("pass"),
            Pass::Exit(ExitReason::InputClosed)
        );
        assert!(h.server.take_received().is_empty());
        assert!(h.server.is_closed());
    }

    struct BrokenTerminal;

    impl Write for BrokenTerminal {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn local_output_failure_ends_the_dialogue() {
        let (connection, server) = memory::pair();
        let (input, _keyboard) = memory::pair();
        let mut dialogue = Dialogue::new(connection, input, BrokenTerminal, MAX_TEXT_SIZE);

        server.send("nobody will see this\n");
        let err = dialogue.pass().expect_err("output is broken");
        assert!(matches!(err, DialogueError::LocalOutput(_)));
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn drive_runs_until_the_sentinel() {
        let mut h = harness();
        h.server.send("welcome\n");
        h.keyboard.send("hi\n.\n");

        let reason = time::timeout(
            Duration::from_secs(2),
            drive(&mut h.dialogue, Duration::from_millis(1)),
        )
        .await
        .expect("dialogue should finish")
        .expect("dialogue should not fail");

        assert_eq!(reason, ExitReason::Sentinel);
        assert_eq!(h.server.take_text(), "hi\n");
        assert_eq!(h.dialogue.output(), b"welcome\n");
    }
}
