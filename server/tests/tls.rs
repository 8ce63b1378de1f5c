#![cfg(unix)]

use std::{
    fs,
    io::{self, Read, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

use sockfactory_common::{
    config::{ClientCertPath, ServerCertPath},
    context::TlsContext,
};
use sockfactory_server::{create_server_socket, SocketAddress, SocketContext, SocketFactory};
use tempfile::TempDir;

/// Server and client contexts sharing a self-signed certificate for
/// `localhost`, loaded through the PEM readers.
fn tls_contexts(dir: &TempDir) -> (SocketContext, SocketContext) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let cert_path = dir.path().join("server.pem");
    let key_path = dir.path().join("server.key.pem");
    fs::write(&cert_path, certified.cert.pem()).unwrap();
    fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

    let server = TlsContext::from_server_certs(&ServerCertPath {
        cert_path: cert_path.clone(),
        key_path,
    })
    .unwrap();
    let client = TlsContext::from_client_certs(&ClientCertPath {
        ca_path:  cert_path,
        identity: None,
    })
    .unwrap()
    .with_server_name("localhost")
    .unwrap();

    (
        SocketContext::new().with_tls(server),
        SocketContext::new().with_tls(client),
    )
}

#[test]
fn tls_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (server_context, client_context) = tls_contexts(&dir);

    let listener = create_server_socket(&"tls://127.0.0.1:0".into(), Some(&server_context)).unwrap();
    let address = SocketAddress::from(listener.local_endpoint().unwrap());
    assert!(address.as_str().starts_with("tls://127.0.0.1:"));

    let server = thread::spawn(move || {
        let mut socket = listener.accept().unwrap();
        assert!(socket.is_tls());
        let mut buf = [0u8; 4];
        socket.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        socket.write_all(b"pong").unwrap();
        socket.flush().unwrap();
    });

    let mut client =
        SocketFactory::create_client_socket(&address, Some(Duration::from_secs(5)), Some(&client_context))
            .unwrap();
    assert!(client.is_tls());
    client.write_all(b"ping").unwrap();
    client.flush().unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"pong");

    server.join().unwrap();
}

#[test]
fn handshake_with_a_plain_peer_is_a_connect_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_, client_context) = tls_contexts(&dir);

    let peer = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = SocketAddress::from(format!("tls://{}", peer.local_addr().unwrap()));
    let plain = thread::spawn(move || {
        let (mut stream, _) = peer.accept().unwrap();
        let mut hello = [0u8; 512];
        let _ = stream.read(&mut hello);
        let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
    });

    let started = Instant::now();
    let error = SocketFactory::create_client_socket(
        &address,
        Some(Duration::from_secs(5)),
        Some(&client_context),
    )
    .err()
    .unwrap();

    assert!(!error.message().is_empty());
    assert!(!error.is_timed_out(), "{error:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    plain.join().unwrap();
}

#[test]
fn slow_handshake_is_cut_off_at_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let (_, client_context) = tls_contexts(&dir);

    let peer = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = SocketAddress::from(format!("tls://{}", peer.local_addr().unwrap()));
    let trickle = thread::spawn(move || {
        let (mut stream, _) = peer.accept().unwrap();
        let mut hello = [0u8; 512];
        let _ = stream.read(&mut hello);
        // Announce a full-size handshake record, then send it a byte at a time
        if stream.write_all(&[0x16, 0x03, 0x03, 0x40, 0x00]).is_err() {
            return;
        }
        for _ in 0..40 {
            thread::sleep(Duration::from_millis(100));
            if stream.write_all(&[0]).is_err() {
                return;
            }
        }
    });

    let timeout = Duration::from_millis(500);
    let started = Instant::now();
    let error = SocketFactory::create_client_socket(&address, Some(timeout), Some(&client_context))
        .err()
        .unwrap();
    let elapsed = started.elapsed();

    assert!(error.is_timed_out(), "{error:?}");
    assert!(elapsed + Duration::from_millis(50) >= timeout, "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    trickle.join().unwrap();
}

#[test]
fn silent_client_cannot_stall_a_tls_accept() {
    let dir = tempfile::tempdir().unwrap();
    let (server_context, _) = tls_contexts(&dir);
    let server_context = server_context.with_handshake_timeout(Duration::from_millis(300));

    let listener = create_server_socket(&"tls://127.0.0.1:0".into(), Some(&server_context)).unwrap();
    let local = listener.local_endpoint().unwrap();
    let _silent = TcpStream::connect(local.trim_start_matches("tls://")).unwrap();

    let started = Instant::now();
    let error = listener.accept().err().unwrap();

    assert_eq!(error.kind(), io::ErrorKind::TimedOut, "{error:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
}
