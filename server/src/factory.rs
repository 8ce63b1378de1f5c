use std::{fs, io, path::Path, time::Duration};

use sockfactory_client::create_client_socket;
use sockfactory_common::{
    address::SocketAddress,
    classifier::get_backing_file,
    context::SocketContext,
    error::{BindOrListenError, ConnectError, ServerSocketError},
    platform_socket::{PlatformListener, PlatformSocket},
};

/// How long the liveness probe waits for an existing listener to answer
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bind and listen on `address`, recovering from a stale socket file.
///
/// When a filesystem-backed address is reported in use, a short connect
/// probe decides whether someone is still listening. If nobody answers, the
/// leftover file is removed and the bind is retried once; the retry's
/// outcome is returned as is. A live listener, or any other bind failure,
/// yields the original error untouched.
pub fn create_server_socket(
    address: &SocketAddress,
    context: Option<&SocketContext>,
) -> Result<PlatformListener, ServerSocketError> {
    let error = match PlatformListener::bind(address, context) {
        Ok(listener) => return Ok(listener),
        Err(error) => error,
    };

    if !error.is_address_in_use() {
        tracing::debug!("Bind to {} failed: {}", address, error);
        return Err(error.into());
    }

    let Some(socket_file) = get_backing_file(address) else {
        tracing::debug!("{} is in use and not file-backed, not recovering", address);
        return Err(error.into());
    };

    match create_client_socket(address, Some(PROBE_TIMEOUT), context) {
        Ok(probe) => {
            // Someone answered: the conflict is real
            drop(probe);
            tracing::warn!("{} is held by a live listener", address);
            Err(error.into())
        }
        Err(probe_error) => recover_stale_file(address, context, &socket_file, &probe_error),
    }
}

fn recover_stale_file(
    address: &SocketAddress,
    context: Option<&SocketContext>,
    socket_file: &Path,
    probe_error: &ConnectError,
) -> Result<PlatformListener, ServerSocketError> {
    if probe_error.is_refused() {
        tracing::info!(
            "Removing stale socket file {:?} (probe: {})",
            socket_file,
            probe_error
        );
    } else {
        // Treated as stale all the same: only a successful connect proves a listener
        tracing::warn!(
            "Probe of {} failed without a refusal ({}), removing {:?} anyway",
            address,
            probe_error,
            socket_file
        );
    }

    remove_socket_file(socket_file)?;

    let listener = PlatformListener::bind(address, context).map_err(|e: BindOrListenError| {
        tracing::error!("Rebinding {} after stale file removal failed: {}", address, e);
        e
    })?;
    tracing::info!("Recovered {} from a stale socket file", address);
    Ok(listener)
}

fn remove_socket_file(path: &Path) -> Result<(), ServerSocketError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        // Another process recovering the same address got there first
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("Stale socket file {:?} already removed", path);
            Ok(())
        }
        Err(source) => {
            tracing::error!("Failed to remove stale socket file {:?}: {}", path, source);
            Err(ServerSocketError::RemoveStaleFile {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Single entry point for opening server and client sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketFactory;

impl SocketFactory {
    /// See [`create_server_socket`].
    pub fn create_server_socket(
        address: &SocketAddress,
        context: Option<&SocketContext>,
    ) -> Result<PlatformListener, ServerSocketError> {
        create_server_socket(address, context)
    }

    /// See [`sockfactory_client::create_client_socket`].
    pub fn create_client_socket(
        address: &SocketAddress,
        timeout: Option<Duration>,
        context: Option<&SocketContext>,
    ) -> Result<PlatformSocket, ConnectError> {
        create_client_socket(address, timeout, context)
    }
}
