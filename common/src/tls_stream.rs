use std::{
    io::{self, Read, Write},
    time::Instant,
};

use rustls::{ClientConnection, Connection, ServerConnection};

use crate::platform_socket::PlatformSocket;

/// Synchronous TLS wrapper for platform sockets
pub struct TlsStream {
    socket: PlatformSocket,
    tls:    Connection,
}

impl TlsStream {
    /// Create a new TLS stream from a server connection and complete the
    /// handshake before `deadline`
    pub fn from_server(
        socket: PlatformSocket,
        tls: ServerConnection,
        deadline: Option<Instant>,
    ) -> io::Result<Self> {
        let mut stream = Self {
            socket,
            tls: Connection::Server(tls),
        };
        stream.complete_handshake(deadline)?;
        Ok(stream)
    }

    /// Create a new TLS stream from a client connection and complete the
    /// handshake before `deadline`
    pub fn from_client(
        socket: PlatformSocket,
        tls: ClientConnection,
        deadline: Option<Instant>,
    ) -> io::Result<Self> {
        let mut stream = Self {
            socket,
            tls: Connection::Client(tls),
        };
        stream.complete_handshake(deadline)?;
        Ok(stream)
    }

    /// The transport underneath the TLS session
    pub fn get_ref(&self) -> &PlatformSocket {
        &self.socket
    }

    /// Drive the handshake to completion.
    ///
    /// The socket timeouts are re-armed with the time left before every
    /// transport read or write, so a slow peer cannot stretch the handshake
    /// past `deadline`. They are cleared again once the session is up.
    fn complete_handshake(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        while self.tls.is_handshaking() {
            if self.tls.wants_write() {
                self.arm(deadline)?;
                self.tls
                    .write_tls(&mut self.socket)
                    .map_err(|e| expired(e, deadline))?;
            }
            if self.tls.wants_read() {
                self.arm(deadline)?;
                let n = self
                    .tls
                    .read_tls(&mut self.socket)
                    .map_err(|e| expired(e, deadline))?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the connection during the TLS handshake",
                    ));
                }
                self.tls.process_new_packets().map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("TLS handshake error: {e}"))
                })?;
            }
        }
        // Flush the final handshake flight (e.g. client Finished)
        while self.tls.wants_write() {
            self.arm(deadline)?;
            self.tls
                .write_tls(&mut self.socket)
                .map_err(|e| expired(e, deadline))?;
        }

        if deadline.is_some() {
            self.socket.set_read_timeout(None)?;
            self.socket.set_write_timeout(None)?;
        }
        Ok(())
    }

    /// Bound the next transport call by the time left before `deadline`.
    fn arm(&self, deadline: Option<Instant>) -> io::Result<()> {
        let Some(deadline) = deadline else {
            return Ok(());
        };
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(handshake_timed_out());
        }
        self.socket.set_read_timeout(Some(left))?;
        self.socket.set_write_timeout(Some(left))
    }
}

/// Socket timeouts surface as `WouldBlock` on Unix; report them as timeouts.
fn expired(error: io::Error, deadline: Option<Instant>) -> io::Error {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut if deadline.is_some() => {
            handshake_timed_out()
        }
        _ => error,
    }
}

#[cfg(unix)]
fn handshake_timed_out() -> io::Error {
    nix::errno::Errno::ETIMEDOUT.into()
}

#[cfg(not(unix))]
fn handshake_timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out")
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.tls.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            // Need more TLS data from the socket
            if self.tls.read_tls(&mut self.socket)? == 0 {
                return Ok(0);
            }
            self.tls
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.tls.writer().write(buf)?;

        // Flush TLS data to socket (ignore WouldBlock in blocking mode)
        while self.tls.wants_write() {
            if let Err(e) = self.tls.write_tls(&mut self.socket) {
                if e.kind() != io::ErrorKind::WouldBlock {
                    return Err(e);
                }
                break;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tls.writer().flush()?;

        while self.tls.wants_write() {
            match self.tls.write_tls(&mut self.socket) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        self.socket.flush()
    }
}
