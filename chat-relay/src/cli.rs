use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::{Args, Parser};

use crate::{
    framer::MAX_TEXT_SIZE,
    registry::DEFAULT_CAPACITY,
    server::{DEFAULT_POLL_INTERVAL, ServerConfig},
};

/// Port used when the client is given a bare host.
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay chat lines between every connected client", long_about = None)]
pub struct ServerCli {
    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Maximum number of simultaneously connected clients.
    #[arg(long, default_value_t = DEFAULT_CAPACITY, value_parser = parse_capacity)]
    pub capacity: usize,

    /// Longest message relayed, newline included. Longer lines are cut.
    #[arg(long, default_value_t = MAX_TEXT_SIZE, value_parser = parse_max_line)]
    pub max_line: usize,

    /// Milliseconds between polling passes.
    #[arg(long, default_value_t = poll_interval_default())]
    pub poll_interval_ms: u64,
}

impl ServerArgs {
    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            capacity: self.capacity,
            max_line: self.max_line,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Chat through a relay server; type '.' on its own line to leave", long_about = None)]
pub struct ClientArgs {
    /// Address of the chat server, as `host` or `host:port`.
    #[arg(value_name = "HOST")]
    pub server: String,

    /// Milliseconds between polling passes.
    #[arg(long, default_value_t = poll_interval_default())]
    pub poll_interval_ms: u64,
}

impl ClientArgs {
    /// The address to dial, with the default port filled in for bare hosts.
    pub fn target(&self) -> String {
        let server = self.server.trim();
        if server.parse::<SocketAddr>().is_ok() {
            return server.to_string();
        }
        if let Ok(ip) = server.parse::<IpAddr>() {
            return SocketAddr::new(ip, DEFAULT_PORT).to_string();
        }
        let has_port = server
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        if has_port {
            server.to_string()
        } else {
            format!("{server}:{DEFAULT_PORT}")
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_capacity(raw: &str) -> Result<usize, String> {
    parse_at_least(raw, 1)
}

// One byte of text plus the terminator.
fn parse_max_line(raw: &str) -> Result<usize, String> {
    parse_at_least(raw, 2)
}

fn parse_at_least(raw: &str, min: usize) -> Result<usize, String> {
    let value: usize = raw.parse().map_err(|err| format!("`{raw}` is not a number: {err}"))?;
    if value < min {
        return Err(format!("must be at least {min}"));
    }
    Ok(value)
}

fn poll_interval_default() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}
