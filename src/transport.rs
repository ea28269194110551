use crate::error::TransportError;
use crate::protocol::{Request, Response};
use crate::signal::TelemetrySample;
use crate::store::TelemetryStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Delivery of one device sample to the ingest side.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, device_id: &str, sample: &TelemetrySample) -> Result<(), TransportError>;
}

impl core::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Transport")
    }
}

/// One short-lived TCP exchange per sample: connect, write the ingest
/// request line, read the response line. The whole exchange is bounded by
/// the send timeout.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn exchange(&self, line: &str) -> Result<Response, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (reader, mut writer) = stream.into_split();

        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();
        let n = reader.read_line(&mut response_line).await?;
        if n == 0 {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed connection",
            )));
        }

        Ok(serde_json::from_str(response_line.trim())?)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, device_id: &str, sample: &TelemetrySample) -> Result<(), TransportError> {
        let request = Request::Ingest {
            payload: Value::Object(sample.to_payload(device_id)),
        };
        let line = serde_json::to_string(&request)?;

        let response = time::timeout(self.timeout, self.exchange(&line))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;

        if response.is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(
                response.message.unwrap_or_else(|| "unknown error".into()),
            ))
        }
    }
}

/// In-process loopback straight into a store, bypassing the network.
#[derive(Debug, Clone)]
pub struct StoreTransport {
    store: Arc<TelemetryStore>,
}

impl StoreTransport {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Transport for StoreTransport {
    async fn send(&self, device_id: &str, sample: &TelemetrySample) -> Result<(), TransportError> {
        self.store
            .ingest(device_id, sample.to_payload(device_id))
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}
