//! Line-delimited JSON request/response envelope shared by the ingest
//! server, the device transport and the CLI client.

use crate::error::IngestError;
use crate::store::{DeviceStatus, TelemetryRecord, TelemetryStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ingest { payload: Value },
    Latest,
    Status,
    RemoveDisconnected,
    RemoveAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_devices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_count: Option<usize>,
}

impl Response {
    fn new(status: ResponseStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            device_id: None,
            missing: Vec::new(),
            devices: None,
            removed_devices: None,
            removed_count: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Success, Some(message.into()))
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Info, Some(message.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Error, Some(message.into()))
    }

    pub fn ingested(device_id: &str) -> Self {
        let mut response = Self::success(format!("Data received from {device_id}"));
        response.device_id = Some(device_id.to_string());
        response
    }

    pub fn rejected(err: &IngestError) -> Self {
        let mut response = Self::error(err.to_string());
        response.missing = err.missing_fields().to_vec();
        response
    }

    pub fn latest(records: &BTreeMap<String, TelemetryRecord>) -> Self {
        let mut response = Self::new(ResponseStatus::Success, None);
        response.devices = serde_json::to_value(records).ok();
        response
    }

    pub fn device_status(statuses: &BTreeMap<String, DeviceStatus>) -> Self {
        let mut response = Self::new(ResponseStatus::Success, None);
        response.devices = serde_json::to_value(statuses).ok();
        response
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Execute one request against the store.
pub fn dispatch(store: &TelemetryStore, request: Request) -> Response {
    match request {
        Request::Ingest { payload } => match store.ingest_value(payload) {
            Ok(device_id) => Response::ingested(&device_id),
            Err(e) => Response::rejected(&e),
        },
        Request::Latest => Response::latest(&store.read_all()),
        Request::Status => Response::device_status(&store.status()),
        Request::RemoveDisconnected => {
            let removed = store.remove_disconnected();
            let mut response = if removed.is_empty() {
                Response::info("No disconnected devices to remove")
            } else {
                Response::success(format!("Removed {} disconnected device(s)", removed.len()))
            };
            response.removed_devices = Some(removed);
            response
        }
        Request::RemoveAll => {
            let count = store.remove_all();
            let mut response = Response::success(format!("All {count} device(s) were removed"));
            response.removed_count = Some(count);
            response
        }
    }
}

/// Parse and execute one request line. Malformed lines get an error response.
pub fn handle_line(store: &TelemetryStore, line: &str) -> Response {
    if line.len() > MAX_REQUEST_SIZE {
        return Response::error(format!("Request exceeds {MAX_REQUEST_SIZE} bytes"));
    }
    match serde_json::from_str::<Request>(line) {
        Ok(request) => dispatch(store, request),
        Err(e) => Response::error(format!("Invalid request: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request: Request = serde_json::from_str(r#"{"op":"remove_disconnected"}"#).unwrap();
        assert_eq!(request, Request::RemoveDisconnected);

        let request: Request =
            serde_json::from_value(json!({"op": "ingest", "payload": {"device_id": "X"}})).unwrap();
        assert!(matches!(request, Request::Ingest { .. }));
    }

    #[test]
    fn test_rejection_lists_missing_keys() {
        let store = TelemetryStore::new();
        let response = handle_line(
            &store,
            r#"{"op":"ingest","payload":{"device_id":"CAR_A","rpm":2500,"speed":60}}"#,
        );
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.missing, vec!["temp_motor".to_string(), "throttle_pos".to_string()]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_garbage_line_is_an_error_response() {
        let store = TelemetryStore::new();
        let response = handle_line(&store, "not json");
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.message.unwrap().starts_with("Invalid request"));
    }

    #[test]
    fn test_remove_disconnected_reports_info_when_nothing_removed() {
        let store = TelemetryStore::new();
        let response = dispatch(&store, Request::RemoveDisconnected);
        assert_eq!(response.status, ResponseStatus::Info);
        assert_eq!(response.removed_devices, Some(vec![]));
    }
}
