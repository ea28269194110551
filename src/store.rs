//! Concurrent registry of the latest telemetry record per device.
//!
//! Every operation takes the registry lock exactly once, so a reader never
//! observes a record with some fields from one ingest or sweep and some from
//! another. Liveness fields are derived from the private arrival instant and
//! are refreshed by [`TelemetryStore::sweep`] and again on every read.

use crate::error::IngestError;
use crate::liveness::{ConnectionStatus, LivenessPolicy};
use crate::signal::TIMESTAMP_FORMAT;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info};

pub const REQUIRED_FIELDS: [&str; 4] = ["rpm", "speed", "temp_motor", "throttle_pos"];

const DEVICE_ID_KEY: &str = "device_id";
const TIMESTAMP_KEY: &str = "timestamp";
const CONNECTION_STATUS_KEY: &str = "connection_status";
const LAST_SEEN_SECONDS_KEY: &str = "last_seen_seconds";
const WAS_CONNECTED_KEY: &str = "was_connected";

/// Defaults applied when a device omits an optional field at ingest time.
const INGEST_DEFAULTS: [(&str, OptionalDefault); 3] = [
    ("voltage", OptionalDefault::Float(13.5)),
    ("gear", OptionalDefault::Int(0)),
    ("fuel_level", OptionalDefault::Float(50.0)),
];

/// Defaults applied on read to records that predate the optional fields.
const READ_DEFAULTS: [(&str, OptionalDefault); 3] = [
    ("voltage", OptionalDefault::Float(0.0)),
    ("gear", OptionalDefault::Int(0)),
    ("fuel_level", OptionalDefault::Float(0.0)),
];

#[derive(Debug, Clone, Copy)]
enum OptionalDefault {
    Float(f64),
    Int(i64),
}

impl OptionalDefault {
    fn to_value(self) -> Value {
        match self {
            OptionalDefault::Float(v) => Value::from(v),
            OptionalDefault::Int(v) => Value::from(v),
        }
    }
}

/// Latest record for one device: every field the device reported, verbatim,
/// plus the derived liveness fields. Serializes as one flat JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryRecord {
    fields: Map<String, Value>,
}

impl TelemetryRecord {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        match self.fields.get(CONNECTION_STATUS_KEY).and_then(Value::as_str) {
            Some("connected") => Some(ConnectionStatus::Connected),
            Some("disconnected") => Some(ConnectionStatus::Disconnected),
            _ => None,
        }
    }

    pub fn last_seen_seconds(&self) -> Option<f64> {
        self.get_f64(LAST_SEEN_SECONDS_KEY)
    }

    pub fn was_connected(&self) -> bool {
        self.fields
            .get(WAS_CONNECTED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.fields.get(TIMESTAMP_KEY).and_then(Value::as_str)
    }

    pub fn voltage(&self) -> Option<f64> {
        self.get_f64("voltage")
    }

    pub fn gear(&self) -> Option<i64> {
        self.fields.get("gear").and_then(Value::as_i64)
    }

    pub fn fuel_level(&self) -> Option<f64> {
        self.get_f64("fuel_level")
    }

    fn apply_liveness(&mut self, policy: &LivenessPolicy, elapsed: std::time::Duration) {
        let liveness = policy.evaluate(elapsed);
        self.fields.insert(
            CONNECTION_STATUS_KEY.into(),
            Value::from(liveness.status.as_str()),
        );
        self.fields.insert(
            LAST_SEEN_SECONDS_KEY.into(),
            Value::from(liveness.last_seen_seconds),
        );
        // Sticky: set once, never cleared while the record lives.
        if liveness.stale && !self.fields.contains_key(WAS_CONNECTED_KEY) {
            self.fields.insert(WAS_CONNECTED_KEY.into(), Value::Bool(true));
        }
    }

    fn fill_missing(&mut self, defaults: &[(&str, OptionalDefault)]) {
        for (key, default) in defaults {
            if !self.fields.contains_key(*key) {
                self.fields.insert((*key).to_string(), default.to_value());
            }
        }
    }

    /// Read-side backfill for records stored without the optional fields.
    pub fn backfill_read_defaults(&mut self) {
        self.fill_missing(&READ_DEFAULTS);
    }
}

/// Per-device connectivity summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub last_seen: Option<f64>,
    pub last_update: String,
}

#[derive(Debug)]
struct Entry {
    record: TelemetryRecord,
    last_seen: Instant,
}

impl Entry {
    fn refresh(&mut self, policy: &LivenessPolicy, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_seen);
        self.record.apply_liveness(policy, elapsed);
    }
}

#[derive(Debug, Default)]
pub struct TelemetryStore {
    entries: Mutex<HashMap<String, Entry>>,
    policy: LivenessPolicy,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::with_policy(LivenessPolicy::default())
    }

    pub fn with_policy(policy: LivenessPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.entries.lock().contains_key(device_id)
    }

    /// Wire entry point: validates a raw JSON payload and ingests it.
    /// Returns the device id on success.
    pub fn ingest_value(&self, payload: Value) -> Result<String, IngestError> {
        self.ingest_value_at(payload, Instant::now())
    }

    pub fn ingest_value_at(&self, payload: Value, now: Instant) -> Result<String, IngestError> {
        let Value::Object(payload) = payload else {
            return Err(IngestError::NotAnObject);
        };
        let device_id = match payload.get(DEVICE_ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => return Err(IngestError::MissingDeviceId),
        };

        self.ingest_at(&device_id, payload, now)?;
        Ok(device_id)
    }

    pub fn ingest(&self, device_id: &str, payload: Map<String, Value>) -> Result<(), IngestError> {
        self.ingest_at(device_id, payload, Instant::now())
    }

    /// Validate and upsert. The record is built completely before the lock
    /// is taken, so a rejected payload leaves the store untouched and an
    /// accepted one replaces the previous record in a single step.
    pub fn ingest_at(
        &self,
        device_id: &str,
        payload: Map<String, Value>,
        now: Instant,
    ) -> Result<(), IngestError> {
        let record = build_record(device_id, payload)?;

        {
            let mut entries = self.entries.lock();
            entries.insert(
                device_id.to_string(),
                Entry {
                    record,
                    last_seen: now,
                },
            );
        }

        debug!("📥 Telemetry received from {}", device_id);
        Ok(())
    }

    /// Recompute derived liveness fields on every record. Returns the number
    /// of records refreshed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        for entry in entries.values_mut() {
            entry.refresh(&self.policy, now);
        }
        entries.len()
    }

    pub fn read(&self, device_id: &str) -> Option<TelemetryRecord> {
        self.read_at(device_id, Instant::now())
    }

    pub fn read_at(&self, device_id: &str, now: Instant) -> Option<TelemetryRecord> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(device_id)?;
        entry.refresh(&self.policy, now);
        entry.record.backfill_read_defaults();
        Some(entry.record.clone())
    }

    /// Stored record as left by the last ingest or sweep, without
    /// recomputing liveness or backfilling defaults.
    pub fn peek(&self, device_id: &str) -> Option<TelemetryRecord> {
        self.entries
            .lock()
            .get(device_id)
            .map(|entry| entry.record.clone())
    }

    /// Snapshot of every record, ordered by device id.
    pub fn read_all(&self) -> BTreeMap<String, TelemetryRecord> {
        self.read_all_at(Instant::now())
    }

    pub fn read_all_at(&self, now: Instant) -> BTreeMap<String, TelemetryRecord> {
        let mut entries = self.entries.lock();
        entries
            .iter_mut()
            .map(|(device_id, entry)| {
                entry.refresh(&self.policy, now);
                entry.record.backfill_read_defaults();
                (device_id.clone(), entry.record.clone())
            })
            .collect()
    }

    pub fn status(&self) -> BTreeMap<String, DeviceStatus> {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> BTreeMap<String, DeviceStatus> {
        let entries = self.entries.lock();
        entries
            .iter()
            .map(|(device_id, entry)| {
                let liveness = self
                    .policy
                    .evaluate(now.saturating_duration_since(entry.last_seen));
                let status = DeviceStatus {
                    connected: liveness.status.is_connected(),
                    last_seen: Some(liveness.last_seen_seconds),
                    last_update: entry.record.timestamp().unwrap_or("N/A").to_string(),
                };
                (device_id.clone(), status)
            })
            .collect()
    }

    /// Evict every device silent for longer than the liveness timeout.
    pub fn remove_disconnected(&self) -> Vec<String> {
        self.remove_disconnected_at(Instant::now())
    }

    pub fn remove_disconnected_at(&self, now: Instant) -> Vec<String> {
        let mut removed = Vec::new();
        {
            let mut entries = self.entries.lock();
            entries.retain(|device_id, entry| {
                let elapsed = now.saturating_duration_since(entry.last_seen);
                if self.policy.is_evictable(elapsed) {
                    removed.push(device_id.clone());
                    false
                } else {
                    true
                }
            });
        }

        removed.sort();
        for device_id in &removed {
            info!("🚮 Device {} removed (disconnected)", device_id);
        }
        removed
    }

    /// Drop every record. Returns how many there were.
    pub fn remove_all(&self) -> usize {
        let count = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        info!("🗑️  All {} devices removed", count);
        count
    }
}

fn build_record(device_id: &str, payload: Map<String, Value>) -> Result<TelemetryRecord, IngestError> {
    if device_id.is_empty() {
        return Err(IngestError::MissingDeviceId);
    }

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|key| !payload.contains_key(**key))
        .map(|key| (*key).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingFields(missing));
    }

    if let Some(key) = REQUIRED_FIELDS.iter().find(|key| !payload[**key].is_number()) {
        return Err(IngestError::InvalidField((*key).to_string()));
    }

    let mut fields = Map::new();
    fields.insert(
        TIMESTAMP_KEY.into(),
        Value::from(chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()),
    );
    for (key, value) in payload {
        if key != DEVICE_ID_KEY {
            fields.insert(key, value);
        }
    }

    fields.insert(
        CONNECTION_STATUS_KEY.into(),
        Value::from(ConnectionStatus::Connected.as_str()),
    );
    fields.insert(LAST_SEEN_SECONDS_KEY.into(), Value::from(0));
    fields.insert(WAS_CONNECTED_KEY.into(), Value::Bool(true));

    let mut record = TelemetryRecord::from_fields(fields);
    record.fill_missing(&INGEST_DEFAULTS);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test payloads are objects"),
        }
    }

    #[test]
    fn test_invalid_field_leaves_store_unchanged() {
        let store = TelemetryStore::new();
        let result = store.ingest(
            "CAR_A",
            payload(json!({"rpm": "fast", "speed": 60, "temp_motor": 90, "throttle_pos": 40})),
        );
        assert_eq!(result, Err(IngestError::InvalidField("rpm".into())));
        assert!(store.is_empty());
    }

    #[test]
    fn test_device_id_not_copied_into_record() {
        let store = TelemetryStore::new();
        store
            .ingest_value(json!({"device_id": "CAR_A", "rpm": 1, "speed": 2, "temp_motor": 3, "throttle_pos": 4}))
            .unwrap();
        let record = store.read("CAR_A").unwrap();
        assert!(record.get("device_id").is_none());
    }

    #[test]
    fn test_read_backfill_uses_zero_defaults() {
        let mut record = TelemetryRecord::from_fields(payload(json!({"rpm": 900})));
        record.backfill_read_defaults();
        assert_eq!(record.voltage(), Some(0.0));
        assert_eq!(record.gear(), Some(0));
        assert_eq!(record.fuel_level(), Some(0.0));
    }

    #[test]
    fn test_backfill_keeps_reported_values() {
        let mut record = TelemetryRecord::from_fields(payload(json!({"voltage": 12.1, "gear": 4})));
        record.backfill_read_defaults();
        assert_eq!(record.voltage(), Some(12.1));
        assert_eq!(record.gear(), Some(4));
        assert_eq!(record.fuel_level(), Some(0.0));
    }

    #[test]
    fn test_peek_shows_only_swept_liveness() {
        let store = TelemetryStore::new();
        let base = Instant::now();
        store
            .ingest_at("A", payload(json!({"rpm": 1, "speed": 2, "temp_motor": 3, "throttle_pos": 4})), base)
            .unwrap();

        let unswept = store.peek("A").unwrap();
        assert_eq!(unswept.connection_status(), Some(ConnectionStatus::Connected));
        assert_eq!(unswept.last_seen_seconds(), Some(0.0));

        store.sweep_at(base + Duration::from_secs(20));
        let swept = store.peek("A").unwrap();
        assert_eq!(swept.connection_status(), Some(ConnectionStatus::Disconnected));
        assert_eq!(swept.last_seen_seconds(), Some(20.0));
        assert!(store.peek("missing").is_none());
    }

    #[test]
    fn test_sweep_never_moves_last_seen() {
        let store = TelemetryStore::new();
        let base = Instant::now();
        store
            .ingest_at("A", payload(json!({"rpm": 1, "speed": 2, "temp_motor": 3, "throttle_pos": 4})), base)
            .unwrap();

        store.sweep_at(base + Duration::from_secs(30));
        store.sweep_at(base + Duration::from_secs(5));
        let record = store.read_at("A", base + Duration::from_secs(5)).unwrap();
        assert_eq!(record.connection_status(), Some(ConnectionStatus::Connected));
        assert_eq!(record.last_seen_seconds(), Some(5.0));
    }
}
