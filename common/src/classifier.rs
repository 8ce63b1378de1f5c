use std::path::PathBuf;

use crate::address::{Endpoint, SocketAddress};

/// Returns the filesystem path backing `address`, if it has one.
///
/// Classification is purely syntactic: nothing is checked on disk. TCP/TLS
/// endpoints, abstract-namespace sockets and addresses that do not parse
/// yield `None`.
pub fn get_backing_file(address: &SocketAddress) -> Option<PathBuf> {
    match address.endpoint() {
        Ok(Endpoint::Unix(path)) => Some(path),
        _ => None,
    }
}

/// Whether `address` denotes a filesystem-backed endpoint.
pub fn is_file_backed(address: &SocketAddress) -> bool {
    get_backing_file(address).is_some()
}
