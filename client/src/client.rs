use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use rustls::ClientConnection;
use sockfactory_common::{
    address::{Endpoint, SocketAddress},
    config::default_socket_timeout,
    context::SocketContext,
    error::ConnectError,
    platform_socket::{connect_socket, PlatformSocket},
    tls_stream::TlsStream,
};

/// Connect to `address` within `timeout`.
///
/// Without a timeout the process-wide default is read for this call. Every
/// failure, including a TLS handshake failure, is reported as a
/// [`ConnectError`] carrying the underlying errno and message.
pub fn create_client_socket(
    address: &SocketAddress,
    timeout: Option<Duration>,
    context: Option<&SocketContext>,
) -> Result<PlatformSocket, ConnectError> {
    let timeout = timeout.unwrap_or_else(default_socket_timeout);
    let deadline = Instant::now().checked_add(timeout);

    let endpoint = address.endpoint()?;
    let socket = connect_socket(address, timeout)?;

    match endpoint {
        Endpoint::Tcp {
            host, tls: true, ..
        } => {
            let socket = establish_tls(socket, address, &host, context, deadline)?;
            tracing::debug!("TLS session established with {}", address);
            Ok(socket)
        }
        _ => {
            tracing::debug!("Connected to {}", address);
            Ok(socket)
        }
    }
}

/// Run the client handshake on `socket`, finishing before `deadline`.
fn establish_tls(
    socket: PlatformSocket,
    address: &SocketAddress,
    host: &str,
    context: Option<&SocketContext>,
    deadline: Option<Instant>,
) -> Result<PlatformSocket, ConnectError> {
    let tls = context.and_then(|c| c.tls.as_ref());
    let config = tls.and_then(|t| t.client_config()).ok_or_else(|| {
        ConnectError::new(
            0,
            format!("TLS address '{address}' requires a client TLS context"),
        )
    })?;
    let server_name = tls
        .map(|t| t.server_name_for(host))
        .transpose()
        .map_err(|e| ConnectError::new(0, e.to_string()))?
        .ok_or_else(|| ConnectError::new(0, "Missing TLS server name"))?;

    let conn = ClientConnection::new(Arc::clone(config), server_name)
        .map_err(|e| ConnectError::new(0, format!("TLS setup failed: {e}")))?;
    let stream = TlsStream::from_client(socket, conn, deadline)?;

    Ok(PlatformSocket::Tls(Box::new(stream)))
}

#[cfg(test)]
mod tests {
    use sockfactory_common::context::TlsContext;

    use super::*;

    #[test]
    fn malformed_address_is_a_connect_error() {
        let error = create_client_socket(&"tcp://nowhere".into(), Some(Duration::from_secs(1)), None)
            .err()
            .unwrap();
        assert_eq!(error.errno(), 0);
        assert!(error.message().contains("Missing port"));
    }

    #[test]
    fn tls_requires_a_client_context() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = SocketAddress::from(format!("tls://{}", listener.local_addr().unwrap()));

        let error = create_client_socket(&address, Some(Duration::from_secs(1)), None)
            .err()
            .unwrap();
        assert!(error.message().contains("requires a client TLS context"));

        let context = SocketContext::new().with_tls(TlsContext::default());
        let error = create_client_socket(&address, Some(Duration::from_secs(1)), Some(&context))
            .err()
            .unwrap();
        assert!(error.message().contains("requires a client TLS context"));
    }
}
