//! Frame transport
//!
//! One persistent TCP connection to the remote consumer, client-initiated and
//! reused for every message. Each message is framed as a 4-byte big-endian
//! payload length followed by exactly that many payload bytes, so the
//! consumer can reassemble discrete messages from the byte stream. A send
//! either delivers one complete message or fails and marks the connection
//! broken; reconnect policy lives in the pipeline driver.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::StreamConfig;
use crate::error::TransportError;

/// Width of the message length prefix on the wire
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// A reconnectable sink for framed messages
pub trait Transport {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;
    fn close(&mut self);
    fn is_connected(&self) -> bool;
}

/// TCP transport to the remote avatar consumer
pub struct TcpTransport {
    config: StreamConfig,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            config: config.clone(),
            stream: None,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let endpoint = self.endpoint();
        tracing::info!("Connecting to consumer at {}", endpoint);

        let addr = endpoint
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                addr: endpoint.clone(),
                message: e.to_string(),
            })?
            .next()
            .ok_or_else(|| TransportError::Connect {
                addr: endpoint.clone(),
                message: "address resolved to nothing".to_string(),
            })?;

        let stream = TcpStream::connect_timeout(
            &addr,
            Duration::from_millis(self.config.connect_timeout_ms),
        )
        .map_err(|e| TransportError::Connect {
            addr: endpoint.clone(),
            message: e.to_string(),
        })?;

        // Frames are latency-sensitive; never batch small writes
        stream.set_nodelay(true).map_err(|e| TransportError::Connect {
            addr: endpoint.clone(),
            message: format!("set_nodelay failed: {}", e),
        })?;
        stream
            .set_write_timeout(Some(Duration::from_millis(self.config.write_timeout_ms)))
            .map_err(|e| TransportError::Connect {
                addr: endpoint,
                message: format!("set_write_timeout failed: {}", e),
            })?;

        tracing::info!("Connected to consumer");
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let len = u32::try_from(payload.len()).map_err(|_| {
            TransportError::Send(format!("payload of {} bytes exceeds frame limit", payload.len()))
        })?;

        if let Err(e) = write_framed(stream, len, payload) {
            // The stream position is now unknown; the connection is broken
            self.stream = None;
            return Err(TransportError::Send(e.to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("Disconnected from consumer");
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Write one complete message: length prefix, payload, flush.
/// Partial writes stay hidden inside `write_all`.
fn write_framed(stream: &mut TcpStream, len: u32, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}
