//! Synload Server
//!
//! Counterpart service for the synload client. Each connection is served in
//! order: read a 48-byte request, spend the requested service time, answer
//! with the 8-byte response carrying the request's tag.
//!
//! Protocol:
//! - Request: [tag: u64][count: u64][delay: u64; 4] (48 bytes, little-endian)
//! - Response: [tag: u64] (8 bytes), sent after sum(delay[..count]) microseconds

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use synload_core::{RequestPacket, ResponsePacket};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "synload-server")]
#[command(about = "Synthetic-protocol server for synload latency experiments")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9999")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Maximum service time (microseconds) - requests asking for more are capped
    #[arg(long, default_value = "10000000")]
    max_delay_us: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

async fn handle_client(mut socket: TcpStream, max_delay_us: u64) -> Result<()> {
    let peer_addr = socket.peer_addr()?;
    socket.set_nodelay(true)?;
    tracing::debug!("New connection from {peer_addr}");

    let mut buffer = [0u8; RequestPacket::SIZE];
    let mut request_count = 0u64;

    loop {
        match socket.read_exact(&mut buffer).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!("Client {peer_addr} disconnected after {request_count} requests");
                break;
            }
            Err(e) => {
                tracing::warn!("Error reading from {peer_addr}: {e}");
                break;
            }
        }

        let request = match RequestPacket::decode(&buffer) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Dropping {peer_addr}: {e}");
                break;
            }
        };

        let requested_us = request.total_delay_us();
        let delay_us = requested_us.min(max_delay_us);
        if delay_us != requested_us {
            tracing::debug!(
                "Request {:#x} from {peer_addr}: service time capped from {requested_us}us to {delay_us}us",
                request.tag
            );
        }
        if delay_us > 0 {
            sleep(Duration::from_micros(delay_us)).await;
        }

        let response = ResponsePacket { tag: request.tag };
        if let Err(e) = socket.write_all(&response.encode()).await {
            tracing::warn!("Error writing to {peer_addr}: {e}");
            break;
        }

        request_count += 1;
        if request_count % 10000 == 0 {
            tracing::trace!("Client {peer_addr}: {request_count} requests processed");
        }
    }

    tracing::debug!("Connection from {peer_addr} closed (total requests: {request_count})");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Synload server listening on {addr}");
    tracing::info!("Max service time: {}us", args.max_delay_us);

    loop {
        let (socket, addr) = listener.accept().await?;
        let max_delay_us = args.max_delay_us;

        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, max_delay_us).await {
                tracing::warn!("Error handling client {addr}: {e}");
            }
        });
    }
}
