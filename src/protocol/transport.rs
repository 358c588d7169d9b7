// src/protocol/transport.rs
//! Newline-delimited JSON framing over TCP

use crate::utils::errors::{Result, UplinkError};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info};

/// Longest line accepted from the service
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// A connected, line-framed stream
pub type LineTransport = Framed<TcpStream, LinesCodec>;

/// Open a line-framed connection to `address` (`host:port`)
pub async fn connect(address: &str) -> Result<LineTransport> {
    debug!("Connecting to {}", address);

    let stream = TcpStream::connect(address).await.map_err(|e| {
        UplinkError::ConnectionClosed(format!("Failed to connect to {}: {}", address, e))
    })?;
    stream
        .set_nodelay(true)
        .map_err(|e| UplinkError::ConnectionClosed(format!("Failed to configure socket: {}", e)))?;

    info!("Connected to {}", address);
    Ok(Framed::new(
        stream,
        LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
    ))
}
