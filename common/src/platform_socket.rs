use std::{
    io::{self, Read, Write},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

use rustls::{ServerConfig, ServerConnection};

use crate::{
    address::{Endpoint, SocketAddress},
    config::DEFAULT_HANDSHAKE_TIMEOUT,
    context::SocketContext,
    error::{BindOrListenError, ConnectError},
    tls_stream::TlsStream,
};

/// A connected, bidirectional byte stream
pub enum PlatformSocket {
    #[cfg(unix)]
    /// Unix domain socket
    Unix(UnixStream),
    /// TCP socket
    Tcp(TcpStream),
    /// TLS session over another platform socket
    Tls(Box<TlsStream>),
}

/// A bound socket that is listening for connections
pub enum PlatformListener {
    #[cfg(unix)]
    /// Unix domain socket listener
    Unix {
        /// The listening socket
        listener: UnixListener,
        /// Socket file, `None` for abstract-namespace sockets
        path:     Option<PathBuf>,
    },
    /// TCP listener, TLS-terminating when a server config is attached
    Tcp {
        /// The listening socket
        listener:          TcpListener,
        /// TLS configuration for accepted connections
        tls:               Option<Arc<ServerConfig>>,
        /// Limit on each accepted connection's TLS handshake
        handshake_timeout: Duration,
    },
}

impl PlatformSocket {
    /// Set the socket to blocking or non-blocking mode
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            PlatformSocket::Unix(stream) => stream.set_nonblocking(nonblocking),
            PlatformSocket::Tcp(stream) => stream.set_nonblocking(nonblocking),
            PlatformSocket::Tls(stream) => stream.get_ref().set_nonblocking(nonblocking),
        }
    }

    /// Set read timeout for the socket
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            PlatformSocket::Unix(stream) => stream.set_read_timeout(timeout),
            PlatformSocket::Tcp(stream) => stream.set_read_timeout(timeout),
            PlatformSocket::Tls(stream) => stream.get_ref().set_read_timeout(timeout),
        }
    }

    /// Set write timeout for the socket
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            PlatformSocket::Unix(stream) => stream.set_write_timeout(timeout),
            PlatformSocket::Tcp(stream) => stream.set_write_timeout(timeout),
            PlatformSocket::Tls(stream) => stream.get_ref().set_write_timeout(timeout),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, PlatformSocket::Tls(_))
    }
}

impl Read for PlatformSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            PlatformSocket::Unix(stream) => stream.read(buf),
            PlatformSocket::Tcp(stream) => stream.read(buf),
            PlatformSocket::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for PlatformSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            PlatformSocket::Unix(stream) => stream.write(buf),
            PlatformSocket::Tcp(stream) => stream.write(buf),
            PlatformSocket::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            PlatformSocket::Unix(stream) => stream.flush(),
            PlatformSocket::Tcp(stream) => stream.flush(),
            PlatformSocket::Tls(stream) => stream.flush(),
        }
    }
}

impl PlatformListener {
    /// Bind `address` and start listening.
    ///
    /// This is the bare primitive: no stale-file handling happens here.
    pub fn bind(
        address: &SocketAddress,
        context: Option<&SocketContext>,
    ) -> Result<Self, BindOrListenError> {
        let endpoint = address.endpoint()?;
        tracing::debug!("Binding to {}", endpoint);

        let listener = match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let listener = UnixListener::bind(&path)?;
                if let Some(mode) = context.and_then(|c| c.socket_mode) {
                    apply_socket_mode(&path, mode);
                }
                PlatformListener::Unix {
                    listener,
                    path: Some(path),
                }
            }
            #[cfg(target_os = "linux")]
            Endpoint::AbstractUnix(name) => {
                use std::os::linux::net::SocketAddrExt;

                let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
                PlatformListener::Unix {
                    listener: UnixListener::bind_addr(&addr)?,
                    path:     None,
                }
            }
            Endpoint::Tcp { host, port, tls } => {
                let tls = if tls {
                    let config = context
                        .and_then(|c| c.tls.as_ref())
                        .and_then(|t| t.server_config())
                        .ok_or_else(|| {
                            BindOrListenError::new(
                                0,
                                format!("TLS address '{address}' requires a server TLS context"),
                            )
                        })?;
                    Some(Arc::clone(config))
                } else {
                    None
                };
                PlatformListener::Tcp {
                    listener: TcpListener::bind((host.as_str(), port))?,
                    tls,
                    handshake_timeout: context
                        .and_then(|c| c.handshake_timeout)
                        .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
                }
            }
            #[allow(unreachable_patterns)]
            other => {
                return Err(BindOrListenError::new(
                    0,
                    format!("Address '{other}' is not supported on this platform"),
                ))
            }
        };

        tracing::debug!("Listening on {}", address);
        Ok(listener)
    }

    /// Accept a connection, completing the TLS handshake for TLS listeners.
    ///
    /// A TLS peer that does not finish its handshake in time is dropped with
    /// a timed-out error, leaving the listener free to accept again.
    pub fn accept(&self) -> io::Result<PlatformSocket> {
        let socket = match self {
            #[cfg(unix)]
            PlatformListener::Unix { listener, .. } => PlatformSocket::Unix(listener.accept()?.0),
            PlatformListener::Tcp { listener, .. } => PlatformSocket::Tcp(listener.accept()?.0),
        };

        // Accepted sockets may inherit non-blocking mode on some platforms
        socket.set_nonblocking(false)?;

        match self {
            PlatformListener::Tcp {
                tls: Some(config),
                handshake_timeout,
                ..
            } => {
                let conn = ServerConnection::new(Arc::clone(config)).map_err(io::Error::other)?;
                let deadline = Instant::now().checked_add(*handshake_timeout);
                Ok(PlatformSocket::Tls(Box::new(TlsStream::from_server(socket, conn, deadline)?)))
            }
            _ => Ok(socket),
        }
    }

    /// Set the listener to blocking or non-blocking accept
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            PlatformListener::Unix { listener, .. } => listener.set_nonblocking(nonblocking),
            PlatformListener::Tcp { listener, .. } => listener.set_nonblocking(nonblocking),
        }
    }

    /// Socket file backing this listener, if any
    pub fn backing_file(&self) -> Option<&Path> {
        match self {
            #[cfg(unix)]
            PlatformListener::Unix { path, .. } => path.as_deref(),
            PlatformListener::Tcp { .. } => None,
        }
    }

    /// Human-readable local address, e.g. `tcp://127.0.0.1:9000`
    pub fn local_endpoint(&self) -> io::Result<String> {
        match self {
            #[cfg(unix)]
            PlatformListener::Unix { path: Some(path), .. } => {
                Ok(format!("unix://{}", path.display()))
            }
            #[cfg(unix)]
            PlatformListener::Unix { listener, .. } => Ok(format!("{:?}", listener.local_addr()?)),
            PlatformListener::Tcp { listener, tls, .. } => {
                let scheme = if tls.is_some() { "tls" } else { "tcp" };
                Ok(format!("{scheme}://{}", listener.local_addr()?))
            }
        }
    }

    pub fn incoming(&self) -> IncomingConnections<'_> {
        IncomingConnections { listener: self }
    }
}

/// Endless iterator over accepted connections
pub struct IncomingConnections<'a> {
    listener: &'a PlatformListener,
}

impl Iterator for IncomingConnections<'_> {
    type Item = io::Result<PlatformSocket>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.listener.accept())
    }
}

#[cfg(unix)]
fn apply_socket_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        Ok(()) => tracing::debug!("Socket permissions set to {:o}", mode),
        // The listener is already live; a permission tweak is not worth failing over
        Err(e) => tracing::warn!("Failed to set socket permissions on {:?}: {}", path, e),
    }
}

/// Connect to `address`, giving up once `timeout` has elapsed.
///
/// Only the transport is established here; TLS is layered on by the caller.
/// A zero timeout succeeds only when the connection completes immediately.
pub fn connect_socket(address: &SocketAddress, timeout: Duration) -> Result<PlatformSocket, ConnectError> {
    let endpoint = address.endpoint()?;
    let deadline = Instant::now().checked_add(timeout);

    tracing::debug!("Connecting to {} (timeout {:?})", endpoint, timeout);
    connect_endpoint(&endpoint, deadline).map_err(|e| {
        tracing::debug!("Connection to {} failed: {} (kind: {:?})", endpoint, e, e.kind());
        ConnectError::from(e)
    })
}

fn connect_endpoint(endpoint: &Endpoint, deadline: Option<Instant>) -> io::Result<PlatformSocket> {
    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let addr = nix::sys::socket::UnixAddr::new(path.as_path())?;
            sys::connect_within(nix::sys::socket::AddressFamily::Unix, &addr, deadline)
                .map(PlatformSocket::Unix)
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Endpoint::AbstractUnix(name) => {
            let addr = nix::sys::socket::UnixAddr::new_abstract(name.as_bytes())?;
            sys::connect_within(nix::sys::socket::AddressFamily::Unix, &addr, deadline)
                .map(PlatformSocket::Unix)
        }
        Endpoint::Tcp { host, port, .. } => {
            let mut last_err = None;
            for addr in (host.as_str(), *port).to_socket_addrs()? {
                match connect_tcp(addr, deadline) {
                    Ok(stream) => return Ok(PlatformSocket::Tcp(stream)),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses found")
            }))
        }
        #[allow(unreachable_patterns)]
        other => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("Address '{other}' is not supported on this platform"),
        )),
    }
}

#[cfg(unix)]
fn connect_tcp(addr: std::net::SocketAddr, deadline: Option<Instant>) -> io::Result<TcpStream> {
    use nix::sys::socket::{AddressFamily, SockaddrStorage};

    let family = if addr.is_ipv4() {
        AddressFamily::Inet
    } else {
        AddressFamily::Inet6
    };
    sys::connect_within(family, &SockaddrStorage::from(addr), deadline)
}

#[cfg(not(unix))]
fn connect_tcp(addr: std::net::SocketAddr, deadline: Option<Instant>) -> io::Result<TcpStream> {
    match deadline {
        None => TcpStream::connect(addr),
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            TcpStream::connect_timeout(&addr, remaining)
        }
    }
}

/// Non-blocking connect bounded by a deadline.
#[cfg(unix)]
mod sys {
    use std::{
        io,
        os::fd::{AsFd, AsRawFd, OwnedFd},
        time::{Duration, Instant},
    };

    use nix::{
        errno::Errno,
        fcntl::{fcntl, FcntlArg, OFlag},
        poll::{poll, PollFd, PollFlags, PollTimeout},
        sys::socket::{connect, getsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrLike},
    };

    /// Back-off while a Unix listener's backlog is full
    const BACKLOG_RETRY_INTERVAL: Duration = Duration::from_millis(10);

    pub(super) fn connect_within<S: From<OwnedFd>>(
        family: AddressFamily,
        addr: &dyn SockaddrLike,
        deadline: Option<Instant>,
    ) -> io::Result<S> {
        let fd = socket(family, SockType::Stream, SockFlag::empty(), None)?;
        set_nonblocking(&fd, true)?;

        loop {
            match connect(fd.as_raw_fd(), addr) {
                Ok(()) => break,
                Err(Errno::EINPROGRESS | Errno::EINTR) => {
                    wait_connected(&fd, deadline)?;
                    break;
                }
                // Unix sockets report a full backlog instead of connecting asynchronously
                Err(Errno::EAGAIN) => {
                    let remaining = remaining(deadline).unwrap_or(BACKLOG_RETRY_INTERVAL);
                    if remaining.is_zero() {
                        return Err(timed_out());
                    }
                    std::thread::sleep(remaining.min(BACKLOG_RETRY_INTERVAL));
                }
                Err(errno) => return Err(errno.into()),
            }
        }

        set_nonblocking(&fd, false)?;
        Ok(S::from(fd))
    }

    fn wait_connected(fd: &OwnedFd, deadline: Option<Instant>) -> io::Result<()> {
        loop {
            let timeout = match remaining(deadline) {
                None => PollTimeout::NONE,
                // Round up so a sub-millisecond remainder does not spin
                Some(left) => {
                    let millis = left.as_micros().div_ceil(1000).min(u128::from(u16::MAX));
                    PollTimeout::from(millis as u16)
                }
            };

            let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLOUT)];
            match poll(&mut fds, timeout) {
                Ok(0) => {}
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
            if remaining(deadline).is_some_and(|left| left.is_zero()) {
                return Err(timed_out());
            }
        }

        match getsockopt(fd, sockopt::SocketError)? {
            0 => Ok(()),
            err => Err(io::Error::from_raw_os_error(err)),
        }
    }

    fn remaining(deadline: Option<Instant>) -> Option<Duration> {
        deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn timed_out() -> io::Error {
        Errno::ETIMEDOUT.into()
    }

    fn set_nonblocking(fd: &OwnedFd, nonblocking: bool) -> io::Result<()> {
        let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
        let flags = if nonblocking {
            flags | OFlag::O_NONBLOCK
        } else {
            flags & !OFlag::O_NONBLOCK
        };
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
        Ok(())
    }
}
