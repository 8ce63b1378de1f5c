use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sockfactory_common::{
    config::ServerCertPath,
    context::{SocketContext, TlsContext},
    PlatformListener, PlatformSocket, SocketAddress,
};
use sockfactory_server::create_server_socket;
use tracing_subscriber::EnvFilter;

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "sockfactory-server")]
#[command(about = "Listen on a socket address and echo what clients send")]
struct Args {
    /// Address to listen on, e.g. unix:///tmp/app.sock or tcp://127.0.0.1:9000
    address: String,

    /// Octal permission bits for a Unix socket file, e.g. 600
    #[arg(short, long, value_parser = parse_mode)]
    mode: Option<u32>,

    /// Load a TLS server context from SOCKFACTORY_CERTS_DIR
    #[arg(long)]
    tls: bool,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    u32::from_str_radix(value, 8).map_err(|e| format!("invalid octal mode '{value}': {e}"))
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut context = SocketContext::new();
    if let Some(mode) = args.mode {
        context = context.with_socket_mode(mode);
    }
    if args.tls {
        let tls = TlsContext::from_server_certs(&ServerCertPath::new())
            .context("Failed to load TLS server certificates")?;
        context = context.with_tls(tls);
    }

    let address = SocketAddress::from(args.address);
    let listener = create_server_socket(&address, Some(&context))
        .with_context(|| format!("Failed to listen on {address}"))?;
    tracing::info!("✓ Listening on {}", listener.local_endpoint()?);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|e| anyhow!("Failed to install Ctrl-C handler: {}", e))?;

    serve(&listener, &running)?;

    tracing::info!("Shutdown signal received, stopping");
    Ok(())
}

/// Accept connections until `running` is cleared.
fn serve(listener: &PlatformListener, running: &AtomicBool) -> Result<()> {
    // Non-blocking accept so the shutdown flag is noticed
    listener
        .set_nonblocking(true)
        .context("Failed to set listener to non-blocking mode")?;

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok(socket) => {
                tracing::info!("New connection received");
                if let Err(e) = echo(socket) {
                    tracing::error!("Client error: {}", e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // Sleep briefly to avoid busy waiting
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => tracing::error!("Connection error: {}", e),
        }
    }
    Ok(())
}

fn echo(mut socket: PlatformSocket) -> Result<()> {
    socket
        .set_read_timeout(Some(IDLE_TIMEOUT))
        .context("Failed to set read timeout")?;

    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).context("Failed to read from client")?;
        if n == 0 {
            tracing::info!("Client disconnected");
            return Ok(());
        }
        socket
            .write_all(&buf[..n])
            .context("Failed to echo data")?;
        socket.flush()?;
    }
}
