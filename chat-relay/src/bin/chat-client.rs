//! Chat relay client.
//!
//! ```bash
//! chat-client 127.0.0.1        # default port 5000
//! chat-client chat.lan:7000
//! ```
//!
//! Lines typed on stdin go to everyone else on the server; their lines show
//! up on stdout. A line holding just `.` leaves the chat.

use anyhow::Result;
use clap::Parser;

use chat_relay::{cli::ClientArgs, client};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // Chat text owns stdout, so diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = ClientArgs::parse();
    client::run(args).await
}
