use std::{
    io::{Read, Write},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use sockfactory_client::create_client_socket;
use sockfactory_common::{
    config::ClientCertPath,
    context::{SocketContext, TlsContext},
    SocketAddress,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sockfactory-client")]
#[command(about = "Connect to a socket address and exchange a message")]
struct Args {
    /// Address to connect to, e.g. unix:///tmp/app.sock or tcp://127.0.0.1:9000
    address: String,

    /// Connect timeout in seconds (defaults to SOCKFACTORY_DEFAULT_SOCKET_TIMEOUT)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Load a TLS client context from SOCKFACTORY_CERTS_DIR
    #[arg(long)]
    tls: bool,

    /// Name to verify the server certificate against
    #[arg(long, requires = "tls")]
    server_name: Option<String>,

    /// Message to send; the reply of the same length is printed
    message: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let context = if args.tls {
        let mut tls = TlsContext::from_client_certs(&ClientCertPath::new())
            .context("Failed to load TLS client certificates")?;
        if let Some(name) = &args.server_name {
            tls = tls.with_server_name(name)?;
        }
        Some(SocketContext::new().with_tls(tls))
    } else {
        None
    };

    let address = SocketAddress::from(args.address);
    let mut socket = create_client_socket(
        &address,
        args.timeout.map(Duration::from_secs),
        context.as_ref(),
    )
    .with_context(|| format!("Failed to connect to {address}"))?;
    println!("✓ Connected to {address}");

    if let Some(message) = args.message {
        socket
            .write_all(message.as_bytes())
            .context("Failed to send message")?;
        socket.flush().context("Failed to flush socket")?;

        let mut reply = vec![0u8; message.len()];
        socket
            .read_exact(&mut reply)
            .context("Failed to read reply")?;
        println!("{}", String::from_utf8_lossy(&reply));
    }

    Ok(())
}
