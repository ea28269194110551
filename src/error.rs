use std::time::Duration;
use thiserror::Error;

/// Rejection of an ingest payload. The store is never touched when one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("Missing 'device_id' in JSON")]
    MissingDeviceId,
    #[error("Missing required keys ({}) in JSON", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("Field '{0}' must be numeric")]
    InvalidField(String),
}

impl IngestError {
    /// Required keys this rejection names, if any.
    pub fn missing_fields(&self) -> &[String] {
        match self {
            IngestError::MissingFields(fields) => fields,
            _ => &[],
        }
    }
}

/// Failure to deliver one sample. Drivers absorb these into their backoff.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("server rejected sample: {0}")]
    Rejected(String),
    #[error("simulated link failure")]
    SimulatedLoss,
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invalid fleet parameters, surfaced once at setup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FleetError {
    #[error("number of devices must be at least 1")]
    NoDevices,
    #[error("send interval must be positive, got {0:?}")]
    InvalidInterval(Duration),
}
