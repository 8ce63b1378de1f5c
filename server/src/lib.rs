//! sockfactory server
//!
//! Creates listening sockets and recovers Unix domain socket paths left
//! behind by processes that died without cleaning up.
//!
//! Binding a Unix socket path fails with "address in use" whenever the
//! socket file exists, whether or not anything still listens on it.
//! [`create_server_socket`] tells the two cases apart with a one second
//! connect probe:
//!
//! ```text
//! bind ──ok──────────────────────────────────────────▶ listener
//!   │
//!   └─ in use + file-backed ── probe connect ──ok───▶ original error
//!                                   │
//!                                   └─ failed ── unlink ── bind ──▶ result
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sockfactory_server::SocketFactory;
//!
//! # fn main() -> anyhow::Result<()> {
//! let listener = SocketFactory::create_server_socket(&"unix:///tmp/app.sock".into(), None)?;
//! for connection in listener.incoming() {
//!     let _socket = connection?;
//! }
//! # Ok(())
//! # }
//! ```

mod factory;

pub use factory::*;
// Re-export important types from sockfactory-common for convenience
pub use sockfactory_common::{
    BindOrListenError, ConnectError, PlatformListener, PlatformSocket, ServerSocketError,
    SocketAddress, SocketContext,
};
