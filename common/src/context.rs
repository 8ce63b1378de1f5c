use std::{fs, io::BufReader, path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig, RootCertStore, ServerConfig,
};
use rustls_pemfile::{certs, private_key};

use crate::config::{ClientCertPath, ServerCertPath};

/// Options handed through to the bind and connect primitives.
#[derive(Debug, Clone, Default)]
pub struct SocketContext {
    /// TLS settings used by `tls://` and `ssl://` addresses
    pub tls:               Option<TlsContext>,
    /// Permission bits applied to a newly bound socket file
    pub socket_mode:       Option<u32>,
    /// Limit on the TLS handshake of an accepted connection
    pub handshake_timeout: Option<Duration>,
}

impl SocketContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tls(mut self, tls: TlsContext) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = Some(mode);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}

/// rustls configuration for either side of a connection.
#[derive(Debug, Clone, Default)]
pub struct TlsContext {
    client:      Option<Arc<ClientConfig>>,
    server:      Option<Arc<ServerConfig>>,
    server_name: Option<ServerName<'static>>,
}

impl TlsContext {
    pub fn for_client(config: Arc<ClientConfig>) -> Self {
        Self {
            client: Some(config),
            ..Self::default()
        }
    }

    pub fn for_server(config: Arc<ServerConfig>) -> Self {
        Self {
            server: Some(config),
            ..Self::default()
        }
    }

    /// Name to verify the server certificate against instead of the host
    /// part of the address.
    pub fn with_server_name(mut self, name: &str) -> Result<Self> {
        let name = ServerName::try_from(name.to_string())
            .map_err(|e| anyhow!("Invalid TLS server name '{}': {}", name, e))?;
        self.server_name = Some(name);
        Ok(self)
    }

    pub fn client_config(&self) -> Option<&Arc<ClientConfig>> {
        self.client.as_ref()
    }

    pub fn server_config(&self) -> Option<&Arc<ServerConfig>> {
        self.server.as_ref()
    }

    /// Server name for a connection to `host`.
    pub fn server_name_for(&self, host: &str) -> Result<ServerName<'static>> {
        if let Some(name) = &self.server_name {
            return Ok(name.clone());
        }
        ServerName::try_from(host.to_string())
            .map_err(|e| anyhow!("Invalid TLS server name '{}': {}", host, e))
    }

    /// Builds a client context that trusts the CA in `paths` and presents the
    /// client identity when one is configured.
    pub fn from_client_certs(paths: &ClientCertPath) -> Result<Self> {
        install_crypto_provider();

        tracing::debug!("Loading TLS client configuration:");
        tracing::debug!("  - CA cert: {:?}", paths.ca_path);

        let mut root_store = RootCertStore::empty();
        root_store.add_parsable_certificates(read_certs(&paths.ca_path)?);
        if root_store.is_empty() {
            return Err(anyhow!(
                "No valid CA certificates found in {:?}",
                paths.ca_path
            ));
        }

        let builder = ClientConfig::builder().with_root_certificates(root_store);
        let config = match &paths.identity {
            Some((cert_path, key_path)) => {
                tracing::debug!("  - Client cert: {:?}", cert_path);
                tracing::debug!("  - Client key: {:?}", key_path);
                builder
                    .with_client_auth_cert(read_certs(cert_path)?, read_key(key_path)?)
                    .context("Failed to configure client authentication")?
            }
            None => builder.with_no_client_auth(),
        };

        Ok(Self::for_client(Arc::new(config)))
    }

    /// Builds a server context from the certificate chain and key in `paths`.
    pub fn from_server_certs(paths: &ServerCertPath) -> Result<Self> {
        install_crypto_provider();

        tracing::debug!("Loading TLS server configuration:");
        tracing::debug!("  - Server cert: {:?}", paths.cert_path);
        tracing::debug!("  - Server key: {:?}", paths.key_path);

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(read_certs(&paths.cert_path)?, read_key(&paths.key_path)?)
            .context("Failed to configure server certificate")?;

        Ok(Self::for_server(Arc::new(config)))
    }
}

fn install_crypto_provider() {
    // Fails harmlessly when a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path).with_context(|| format!("Failed to read certificate from {path:?}"))?;
    certs(&mut BufReader::new(&*pem))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {path:?}"))
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = fs::read(path).with_context(|| format!("Failed to read private key from {path:?}"))?;
    private_key(&mut BufReader::new(&*pem))
        .with_context(|| format!("Failed to parse private key {path:?}"))?
        .ok_or_else(|| anyhow!("No private key found in {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_fill_in_fields() {
        let context = SocketContext::new().with_socket_mode(0o600);
        assert_eq!(context.socket_mode, Some(0o600));
        assert!(context.tls.is_none());
        assert!(context.handshake_timeout.is_none());

        let context = context.with_handshake_timeout(Duration::from_secs(2));
        assert_eq!(context.handshake_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn server_name_override_takes_precedence() {
        let tls = TlsContext::default().with_server_name("example.com").unwrap();
        let name = tls.server_name_for("127.0.0.1").unwrap();
        assert_eq!(name.to_str(), "example.com");

        let name = TlsContext::default().server_name_for("127.0.0.1").unwrap();
        assert_eq!(name.to_str(), "127.0.0.1");
    }

    #[test]
    fn missing_certificates_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ServerCertPath {
            cert_path: dir.path().join("server.pem"),
            key_path:  dir.path().join("server.key.pem"),
        };
        let error = TlsContext::from_server_certs(&paths).unwrap_err();
        assert!(error.to_string().contains("Failed to read certificate"));

        let paths = ClientCertPath {
            ca_path:  dir.path().join("root-ca.pem"),
            identity: None,
        };
        assert!(TlsContext::from_client_certs(&paths).is_err());
    }

    #[test]
    fn empty_ca_bundle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ca_path = dir.path().join("root-ca.pem");
        fs::write(&ca_path, "").unwrap();

        let error = TlsContext::from_client_certs(&ClientCertPath {
            ca_path,
            identity: None,
        })
        .unwrap_err();
        assert!(error.to_string().contains("No valid CA certificates"));
    }
}
