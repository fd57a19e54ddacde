use std::{future::Future, time::Duration};

use tokio::{
    select,
    time::{self, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::{
    console::Console,
    framer::MAX_TEXT_SIZE,
    registry::{ConnectionRegistry, DEFAULT_CAPACITY, SlotId},
    relay::{RelayReport, relay_pass},
    transport::{Acceptor, ByteSource, Connection, ReadOutcome},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Number of connection slots.
    pub capacity: usize,
    /// Longest line relayed, terminator included.
    pub max_line: usize,
    /// Pause between passes.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_line: MAX_TEXT_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Running,
    /// Shutdown was requested; the current pass is the last one.
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Default)]
pub struct PassReport {
    /// Slot given to a connection accepted this pass.
    pub accepted: Option<SlotId>,
    /// A connection arrived but every slot was taken.
    pub rejected: bool,
    pub relay: RelayReport,
}

/// The relay server: accepts connections into a fixed-size registry and
/// drives one broadcast pass per step.
pub struct Server<A: Acceptor> {
    acceptor: A,
    registry: ConnectionRegistry<A::Connection>,
    state: ServerState,
    poll_interval: Duration,
}

impl<A: Acceptor> Server<A> {
    pub fn new(acceptor: A, config: &ServerConfig) -> Self {
        Self {
            acceptor,
            registry: ConnectionRegistry::new(config.capacity, config.max_line),
            state: ServerState::Running,
            poll_interval: config.poll_interval,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry<A::Connection> {
        &self.registry
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn request_shutdown(&mut self) {
        if self.state == ServerState::Running {
            self.state = ServerState::ShuttingDown;
        }
    }

    /// One pass: check the control source, accept at most one connection,
    /// then relay. A pass taken while shutting down is the final one.
    pub fn step<S>(&mut self, control: &mut S) -> PassReport
    where
        S: ByteSource + ?Sized,
    {
        let mut report = PassReport::default();
        if self.state == ServerState::Stopped {
            return report;
        }

        self.poll_control(control);
        self.accept_one(&mut report);
        report.relay = relay_pass(&mut self.registry);

        if self.state == ServerState::ShuttingDown {
            info!(clients = self.registry.len(), "server shutting down");
            self.state = ServerState::Stopped;
        }
        report
    }

    /// Steps on every tick until `control` yields a byte or fails, or
    /// `shutdown` resolves.
    pub async fn run_until<S, F>(&mut self, mut control: S, shutdown: F)
    where
        S: ByteSource,
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut armed = true;

        while self.state != ServerState::Stopped {
            select! {
                _ = &mut shutdown, if armed => {
                    armed = false;
                    info!("shutdown signal received");
                    self.request_shutdown();
                }
                _ = ticker.tick() => {}
            }
            self.step(&mut control);
        }
    }

    /// Runs with the process console as control source and ctrl-c as a
    /// second way out.
    pub async fn run_until_console_or_ctrl_c(&mut self) {
        self.run_until(Console::spawn(), async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await;
    }

    fn poll_control<S>(&mut self, control: &mut S)
    where
        S: ByteSource + ?Sized,
    {
        let mut byte = [0u8; 1];
        match control.read(&mut byte) {
            ReadOutcome::Data(_) => {
                info!("shutdown requested from console");
                self.request_shutdown();
            }
            ReadOutcome::NoData => {}
            ReadOutcome::Failed(error) => {
                warn!(%error, "console input failed; shutting down");
                self.request_shutdown();
            }
        }
    }

    fn accept_one(&mut self, report: &mut PassReport) {
        let connection = match self.acceptor.accept() {
            Ok(Some(connection)) => connection,
            Ok(None) => return,
            Err(err) => {
                warn!(error = ?err, "failed to accept connection");
                return;
            }
        };

        let peer = connection.peer_addr();
        match self.registry.register(connection) {
            Ok(slot) => {
                info!(client = %slot, ?peer, "client arrived");
                report.accepted = Some(slot);
            }
            Err(full) => {
                warn!(?peer, capacity = full.capacity(), "registry full; rejecting connection");
                full.into_connection().close();
                report.rejected = true;
            }
        }
    }
}
