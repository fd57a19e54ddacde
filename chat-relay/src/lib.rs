//! Line-oriented chat relay: a server that rebroadcasts every line it reads
//! to all other connected clients, and a client that chats through it.
//!
//! Both sides run a cooperative polling loop over non-blocking connections;
//! nothing ever waits on a single peer. Each module focuses on a concrete
//! responsibility:
//!
//! - [`transport`] defines the connection traits plus a non-blocking TCP
//!   implementation and an in-memory one for tests.
//! - [`framer`] turns a byte stream into newline-terminated lines, cutting
//!   anything longer than [`framer::MAX_TEXT_SIZE`].
//! - [`registry`] is the fixed-size slot table of live connections.
//! - [`relay`] runs one broadcast pass over the registry.
//! - [`server`] accepts connections, watches the console for a shutdown
//!   request, and drives the relay.
//! - [`client`] interleaves server output with local input until the user
//!   types `.`.
//! - [`console`] reads stdin without blocking the polling loops.
//! - [`cli`] holds the command-line arguments for both binaries.
//!
//! Integration tests drive the server and client loops over the in-memory
//! transport; the end-to-end test runs the real binaries.

pub mod cli;
pub mod client;
pub mod console;
pub mod framer;
pub mod registry;
pub mod relay;
pub mod server;
pub mod transport;
