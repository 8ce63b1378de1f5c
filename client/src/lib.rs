//! sockfactory client
//!
//! Opens connected sockets for any address the common crate understands.
//! Connections are bounded by a timeout; when none is given the process-wide
//! default from [`sockfactory_common::config::default_socket_timeout`] is
//! used. `tls://` addresses complete their handshake before the socket is
//! returned.
//!
//! # Example
//!
//! ```no_run
//! use std::{io::Write, time::Duration};
//!
//! use sockfactory_client::create_client_socket;
//!
//! # fn main() -> anyhow::Result<()> {
//! let address = "unix:///tmp/app.sock".into();
//! let mut socket = create_client_socket(&address, Some(Duration::from_secs(5)), None)?;
//! socket.write_all(b"hello")?;
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::*;
// Re-export important types from sockfactory-common for convenience
pub use sockfactory_common::{ConnectError, PlatformSocket, SocketAddress, SocketContext};
