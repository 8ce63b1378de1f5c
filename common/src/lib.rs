//! sockfactory common library
//!
//! Shared building blocks for the sockfactory client and server crates:
//!
//! - Address model and the classifier that spots filesystem-backed endpoints
//! - Typed errors for bind/listen and connect failures
//! - Socket context (TLS configuration, socket-file permissions)
//! - Platform socket and listener handles with the bare bind and connect
//!   primitives
//! - TLS stream wrapper
//!
//! # Addresses
//!
//! | form                      | transport                  | file-backed |
//! |---------------------------|----------------------------|-------------|
//! | `tcp://host:port`         | TCP                        | no          |
//! | `tls://host:port`         | TCP + TLS                  | no          |
//! | `unix:///path/app.sock`   | Unix domain socket         | yes         |
//! | `unix:@name`              | Linux abstract namespace   | no          |

/// Address parsing
pub mod address;

/// Filesystem-backed endpoint detection
pub mod classifier;

/// Process-wide defaults and certificate locations
pub mod config;

/// Options passed through to the socket primitives
pub mod context;

/// Error taxonomy
pub mod error;

/// Platform socket handles and primitives
pub mod platform_socket;

/// TLS stream wrapper for encrypted connections
pub mod tls_stream;

// Re-export commonly used types for convenience
pub use address::{Endpoint, SocketAddress};
pub use classifier::get_backing_file;
pub use context::{SocketContext, TlsContext};
pub use error::{AddressError, BindOrListenError, ConnectError, ServerSocketError};
pub use platform_socket::{PlatformListener, PlatformSocket};
pub use tls_stream::TlsStream;
