#![cfg(unix)]

use std::{
    io::{Read, Write},
    os::unix::net::UnixListener,
    time::{Duration, Instant},
};

use sockfactory_client::{create_client_socket, SocketAddress};
use sockfactory_common::config::{set_default_socket_timeout, DEFAULT_SOCKET_TIMEOUT_ENV};

fn unix_address(dir: &tempfile::TempDir, name: &str) -> (SocketAddress, std::path::PathBuf) {
    let path = dir.path().join(name);
    (SocketAddress::from(format!("unix://{}", path.display())), path)
}

#[test]
fn connects_to_a_live_unix_listener() {
    let dir = tempfile::tempdir().unwrap();
    let (address, path) = unix_address(&dir, "live.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let mut socket = create_client_socket(&address, Some(Duration::from_secs(1)), None).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    socket.write_all(b"hello").unwrap();
    let mut buf = [0u8; 5];
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");
}

#[test]
fn stale_socket_file_refuses_connections() {
    let dir = tempfile::tempdir().unwrap();
    let (address, path) = unix_address(&dir, "stale.sock");
    drop(UnixListener::bind(&path).unwrap());

    let error = create_client_socket(&address, Some(Duration::from_secs(1)), None)
        .err()
        .unwrap();
    assert_eq!(error.errno(), libc::ECONNREFUSED);
    assert!(error.is_refused());
}

#[test]
fn zero_timeout_fails_fast_against_unreachable_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let (stale, path) = unix_address(&dir, "gone.sock");
    drop(UnixListener::bind(&path).unwrap());

    for address in [stale, SocketAddress::from("tcp://10.255.255.1:9")] {
        let started = Instant::now();
        let result = create_client_socket(&address, Some(Duration::ZERO), None);
        assert!(result.is_err(), "{address} should not connect");
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "{address} took {:?}",
            started.elapsed()
        );
    }
}

/// Fills the accept queue of a listener so further connects would block.
#[cfg(target_os = "linux")]
fn saturate(listener: &UnixListener, address: &SocketAddress) -> Vec<sockfactory_client::PlatformSocket> {
    use nix::sys::socket::{listen, Backlog};

    // Listening again only shrinks the backlog
    listen(listener, Backlog::new(0).unwrap()).unwrap();

    let mut pending = Vec::new();
    for _ in 0..16 {
        match create_client_socket(address, Some(Duration::ZERO), None) {
            Ok(socket) => pending.push(socket),
            Err(error) => {
                assert!(error.is_timed_out(), "{error:?}");
                return pending;
            }
        }
    }
    panic!("accept queue never filled up");
}

#[cfg(target_os = "linux")]
#[test]
fn default_timeout_is_read_on_every_call() {
    let dir = tempfile::tempdir().unwrap();
    let (address, path) = unix_address(&dir, "busy.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let _pending = saturate(&listener, &address);

    set_default_socket_timeout(Some(Duration::ZERO));
    let started = Instant::now();
    let error = create_client_socket(&address, None, None).err().unwrap();
    assert!(error.is_timed_out());
    assert!(started.elapsed() < Duration::from_millis(200));

    set_default_socket_timeout(Some(Duration::from_millis(300)));
    let started = Instant::now();
    let error = create_client_socket(&address, None, None).err().unwrap();
    assert!(error.is_timed_out());
    assert!(started.elapsed() >= Duration::from_millis(300));

    // The environment applies once the override is lifted
    std::env::set_var(DEFAULT_SOCKET_TIMEOUT_ENV, "0");
    set_default_socket_timeout(None);
    let started = Instant::now();
    assert!(create_client_socket(&address, None, None).is_err());
    assert!(started.elapsed() < Duration::from_millis(200));
    std::env::remove_var(DEFAULT_SOCKET_TIMEOUT_ENV);
}
