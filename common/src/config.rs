use std::{env, path::PathBuf, sync::RwLock, time::Duration};

/// Timeout applied to client sockets when the caller does not pass one
pub const FALLBACK_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

/// Time an accepted TLS connection gets to finish its handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole seconds; overrides [`FALLBACK_SOCKET_TIMEOUT`]
pub const DEFAULT_SOCKET_TIMEOUT_ENV: &str = "SOCKFACTORY_DEFAULT_SOCKET_TIMEOUT";

const CERTS_DIR_ENV: &str = "SOCKFACTORY_CERTS_DIR";
const DEFAULT_CERTS_DIR: &str = "certs";

const SERVER_CERTS_SUBDIR: &str = "server";
const CLIENT_CERTS_SUBDIR: &str = "client";

static DEFAULT_SOCKET_TIMEOUT: RwLock<Option<Duration>> = RwLock::new(None);

/// Overrides the process-wide default socket timeout. `None` restores the
/// environment/fallback lookup.
pub fn set_default_socket_timeout(timeout: Option<Duration>) {
    let mut guard = DEFAULT_SOCKET_TIMEOUT
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = timeout;
}

/// Current default socket timeout.
///
/// Resolution order: in-process override, then
/// `SOCKFACTORY_DEFAULT_SOCKET_TIMEOUT`, then [`FALLBACK_SOCKET_TIMEOUT`].
/// Nothing is cached, so a changed value applies to the next caller.
pub fn default_socket_timeout() -> Duration {
    let overridden = *DEFAULT_SOCKET_TIMEOUT
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(timeout) = overridden {
        return timeout;
    }

    match env::var(DEFAULT_SOCKET_TIMEOUT_ENV) {
        Ok(value) => parse_timeout_secs(&value).unwrap_or_else(|| {
            tracing::warn!(
                "Ignoring invalid {}={:?}, using {:?}",
                DEFAULT_SOCKET_TIMEOUT_ENV,
                value,
                FALLBACK_SOCKET_TIMEOUT
            );
            FALLBACK_SOCKET_TIMEOUT
        }),
        Err(_) => FALLBACK_SOCKET_TIMEOUT,
    }
}

fn parse_timeout_secs(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn get_certs_dir() -> PathBuf {
    let dir = env::var(CERTS_DIR_ENV).unwrap_or(DEFAULT_CERTS_DIR.to_string());
    PathBuf::from(dir)
}

/// Server certificate paths for TLS listeners
#[derive(Debug, Clone)]
pub struct ServerCertPath {
    /// Path to the server certificate file
    pub cert_path: PathBuf,
    /// Path to the server private key file
    pub key_path:  PathBuf,
}

impl ServerCertPath {
    /// Certificates are expected in a 'server' subdirectory of the certs dir.
    pub fn new() -> Self {
        let base = get_certs_dir().join(SERVER_CERTS_SUBDIR);
        Self {
            cert_path: base.join("server.pem"),
            key_path:  base.join("server.key.pem"),
        }
    }
}

impl Default for ServerCertPath {
    fn default() -> Self {
        Self::new()
    }
}

/// Certificate paths for TLS clients
#[derive(Debug, Clone)]
pub struct ClientCertPath {
    /// Path to the certificate authority used to verify servers
    pub ca_path:  PathBuf,
    /// Optional client certificate and key for mutual TLS
    pub identity: Option<(PathBuf, PathBuf)>,
}

impl ClientCertPath {
    /// The CA lives in the base certs dir; a client identity is used when
    /// both files exist under the 'client' subdirectory.
    pub fn new() -> Self {
        let base = get_certs_dir();
        let client = base.join(CLIENT_CERTS_SUBDIR);
        let cert_path = client.join("client.pem");
        let key_path = client.join("client.key.pem");
        let identity = (cert_path.exists() && key_path.exists()).then_some((cert_path, key_path));
        Self {
            ca_path: base.join("root-ca.pem"),
            identity,
        }
    }
}

impl Default for ClientCertPath {
    fn default() -> Self {
        Self::new()
    }
}
