//! Chat relay server.
//!
//! Accepts clients on `--listen` (default `127.0.0.1:5000`) and relays each
//! line a client sends to every other client. Stops on the first byte or the
//! end of stdin, and on ctrl-c.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chat_relay::{cli::ServerCli, server::Server, transport::tcp::TcpAcceptor};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = ServerCli::parse();
    let acceptor = TcpAcceptor::bind(cli.server.listen).await?;
    let addr = acceptor.local_addr()?;
    info!("server listening on {}", addr);

    let mut server = Server::new(acceptor, &cli.server.config());
    server.run_until_console_or_ctrl_c().await;

    Ok(())
}
