use std::{io, path::PathBuf};

use thiserror::Error;

/// Message fragment used to spot "in use" failures that carry no OS code.
///
/// Message matching is locale and platform dependent; it is only consulted
/// when the error has no errno to inspect.
pub const ADDRESS_IN_USE_MESSAGE: &str = "Address already in use";

/// The address string could not be interpreted by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AddressError {
    message: String,
}

impl AddressError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Binding or listening on an address failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BindOrListenError {
    errno:   i32,
    message: String,
}

impl BindOrListenError {
    pub fn new<S: Into<String>>(errno: i32, message: S) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }

    /// OS error code, or 0 when the failure did not come from the OS
    pub fn errno(&self) -> i32 {
        self.errno
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure means another socket already holds the address.
    ///
    /// Decided from the errno when there is one, otherwise from the message.
    pub fn is_address_in_use(&self) -> bool {
        match self.errno {
            0 => self.message.contains(ADDRESS_IN_USE_MESSAGE),
            errno => io::Error::from_raw_os_error(errno).kind() == io::ErrorKind::AddrInUse,
        }
    }
}

impl From<io::Error> for BindOrListenError {
    fn from(error: io::Error) -> Self {
        Self::new(error.raw_os_error().unwrap_or(0), error.to_string())
    }
}

impl From<AddressError> for BindOrListenError {
    fn from(error: AddressError) -> Self {
        Self::new(0, error.message)
    }
}

/// Connecting to an address failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConnectError {
    errno:   i32,
    message: String,
}

impl ConnectError {
    pub fn new<S: Into<String>>(errno: i32, message: S) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }

    /// OS error code, or 0 when the failure did not come from the OS
    pub fn errno(&self) -> i32 {
        self.errno
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn kind(&self) -> Option<io::ErrorKind> {
        match self.errno {
            0 => None,
            errno => Some(io::Error::from_raw_os_error(errno).kind()),
        }
    }

    /// Nobody is listening: the peer refused, or the socket file is gone.
    pub fn is_refused(&self) -> bool {
        matches!(
            self.kind(),
            Some(io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound)
        )
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self.kind(), Some(io::ErrorKind::TimedOut))
    }
}

impl From<io::Error> for ConnectError {
    fn from(error: io::Error) -> Self {
        Self::new(error.raw_os_error().unwrap_or(0), error.to_string())
    }
}

impl From<AddressError> for ConnectError {
    fn from(error: AddressError) -> Self {
        Self::new(0, error.message)
    }
}

/// Failure of server socket creation, including stale-file recovery.
#[derive(Debug, Error)]
pub enum ServerSocketError {
    /// Bind or listen failed and was not recoverable
    #[error(transparent)]
    BindOrListen(#[from] BindOrListenError),
    /// A stale socket file was found but could not be deleted
    #[error("Failed to remove stale socket file '{}': {source}", path.display())]
    RemoveStaleFile {
        /// The socket file that should have been removed
        path:   PathBuf,
        /// Why the removal failed
        source: io::Error,
    },
}

impl ServerSocketError {
    /// OS error code of the underlying failure
    pub fn errno(&self) -> i32 {
        match self {
            ServerSocketError::BindOrListen(e) => e.errno(),
            ServerSocketError::RemoveStaleFile { source, .. } => source.raw_os_error().unwrap_or(0),
        }
    }

    /// The bind error, when that is what failed
    pub fn as_bind_error(&self) -> Option<&BindOrListenError> {
        match self {
            ServerSocketError::BindOrListen(e) => Some(e),
            ServerSocketError::RemoveStaleFile { .. } => None,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn in_use_is_detected_from_errno() {
        let error = BindOrListenError::from(io::Error::from_raw_os_error(libc::EADDRINUSE));
        assert_eq!(error.errno(), libc::EADDRINUSE);
        assert!(error.is_address_in_use());

        let denied = BindOrListenError::from(io::Error::from_raw_os_error(libc::EACCES));
        assert!(!denied.is_address_in_use());
    }

    #[test]
    fn errno_wins_over_message() {
        let error = BindOrListenError::new(libc::EACCES, "Address already in use, supposedly");
        assert!(!error.is_address_in_use());
    }

    #[test]
    fn message_is_consulted_without_errno() {
        assert!(BindOrListenError::new(0, "bind(): Address already in use").is_address_in_use());
        assert!(!BindOrListenError::new(0, "Unsupported socket scheme").is_address_in_use());
    }

    #[test]
    fn io_messages_are_preserved_verbatim() {
        let io_error = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        let expected = io_error.to_string();
        let error = ConnectError::from(io_error);
        assert_eq!(error.message(), expected);
        assert_eq!(error.to_string(), expected);
        assert!(error.is_refused());
        assert!(!error.is_timed_out());
    }

    #[test]
    fn address_errors_carry_no_errno() {
        let error = ConnectError::from(AddressError::new("Missing port"));
        assert_eq!(error.errno(), 0);
        assert_eq!(error.message(), "Missing port");
        assert!(!error.is_refused());
    }

    #[test]
    fn removal_failure_keeps_its_own_errno() {
        let error = ServerSocketError::RemoveStaleFile {
            path:   PathBuf::from("/tmp/app.sock"),
            source: io::Error::from_raw_os_error(libc::EPERM),
        };
        assert_eq!(error.errno(), libc::EPERM);
        assert!(error.as_bind_error().is_none());
        assert!(error.to_string().contains("/tmp/app.sock"));
    }
}
