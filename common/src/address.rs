use std::{fmt, path::PathBuf};

use crate::error::AddressError;

/// Scheme-qualified endpoint descriptor supplied by the caller.
///
/// The string is kept verbatim; [`SocketAddress::endpoint`] interprets it on
/// demand. Recognised forms:
///
/// - `tcp://host:port` or bare `host:port`
/// - `tls://host:port` and `ssl://host:port` (TCP wrapped in TLS)
/// - `unix:///abs/path`, `unix:/abs/path`, `unix:rel/path`
/// - `unix:@name` (Linux abstract namespace)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketAddress(String);

/// Transport-level view of a [`SocketAddress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP endpoint, optionally wrapped in TLS
    Tcp {
        /// Host name or IP literal (IPv6 without brackets)
        host: String,
        /// Port number
        port: u16,
        /// Whether the scheme asked for TLS
        tls:  bool,
    },
    /// Unix domain socket bound to a filesystem path
    Unix(PathBuf),
    /// Unix domain socket in the Linux abstract namespace
    AbstractUnix(String),
}

impl SocketAddress {
    pub fn new<S: Into<String>>(address: S) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the address into the form the socket primitives understand.
    pub fn endpoint(&self) -> Result<Endpoint, AddressError> {
        let (scheme, rest) = split_scheme(&self.0);

        match scheme.to_ascii_lowercase().as_str() {
            "unix" => parse_unix(rest, &self.0),
            "tcp" => parse_host_port(rest, false, &self.0),
            "tls" | "ssl" => parse_host_port(rest, true, &self.0),
            other => Err(AddressError::new(format!(
                "Unsupported socket scheme '{other}' in address '{}'",
                self.0
            ))),
        }
    }
}

impl From<&str> for SocketAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for SocketAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port, tls } => {
                let scheme = if *tls { "tls" } else { "tcp" };
                if host.contains(':') {
                    write!(f, "{scheme}://[{host}]:{port}")
                } else {
                    write!(f, "{scheme}://{host}:{port}")
                }
            }
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::AbstractUnix(name) => write!(f, "unix:@{name}"),
        }
    }
}

/// Splits `scheme://rest`; `unix:rest` is also accepted and anything without
/// a scheme is treated as TCP.
fn split_scheme(address: &str) -> (&str, &str) {
    // Socket paths may contain "://" themselves, so `unix:` is matched first
    if let Some((scheme, rest)) = address.split_once(':') {
        if scheme.eq_ignore_ascii_case("unix") {
            return (scheme, rest.strip_prefix("//").unwrap_or(rest));
        }
    }
    match address.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("tcp", address),
    }
}

fn parse_unix(rest: &str, original: &str) -> Result<Endpoint, AddressError> {
    if let Some(name) = rest.strip_prefix('@') {
        if name.is_empty() {
            return Err(AddressError::new(format!(
                "Empty abstract socket name in address '{original}'"
            )));
        }
        return Ok(Endpoint::AbstractUnix(name.to_string()));
    }

    if rest.is_empty() {
        return Err(AddressError::new(format!(
            "Missing socket path in address '{original}'"
        )));
    }
    Ok(Endpoint::Unix(PathBuf::from(rest)))
}

fn parse_host_port(rest: &str, tls: bool, original: &str) -> Result<Endpoint, AddressError> {
    let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
        AddressError::new(format!("Missing port in address '{original}'"))
    })?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(AddressError::new(format!(
            "Missing host in address '{original}'"
        )));
    }

    let port = port.parse::<u16>().map_err(|_| {
        AddressError::new(format!("Invalid port '{port}' in address '{original}'"))
    })?;

    Ok(Endpoint::Tcp {
        host: host.to_string(),
        port,
        tls,
    })
}
