//! # Vehicle ECU Telemetry Bus
//!
//! Ingests periodic engine telemetry from many independent vehicles, tracks
//! each device's connectivity from its arrival times, and simulates whole
//! fleets of vehicles producing plausible, correlated telemetry.
//!
//! ## Features
//!
//! - **Correlated signal model**: throttle drives rpm, rpm drives speed and gear,
//!   and temperature, voltage and fuel follow from both
//! - **Fleet simulation**: one independent task per device with failure backoff
//!   and cooperative shutdown
//! - **Telemetry store**: concurrent latest-record registry with verbatim
//!   pass-through of unknown fields
//! - **Liveness tracking**: connected/disconnected status recomputed every
//!   second and on every read, with explicit eviction
//! - **Line-delimited JSON over TCP** for ingest, queries and maintenance
//!
//! ## Quick Start
//!
//! ```rust
//! use ecubus::{SignalModel, TelemetryStore, VehicleType};
//!
//! let store = TelemetryStore::new();
//! let mut model = SignalModel::with_seed(VehicleType::Sedan.profile(), 42);
//!
//! let sample = model.next_sample(0.0);
//! store.ingest("Truck_001", sample.to_payload("Truck_001")).unwrap();
//!
//! let record = store.read("Truck_001").unwrap();
//! assert!(record.connection_status().unwrap().is_connected());
//! ```
//!
//! ## Architecture
//!
//! - [`signal`] - Correlated telemetry generation
//! - [`profile`] - Vehicle profiles bounding generated signals
//! - [`driver`] - Per-device generate/transmit/wait loop
//! - [`fleet`] - Creation, start/stop and monitoring of many drivers
//! - [`transport`] - How drivers deliver samples
//! - [`store`] - Latest-record registry, the ingest target
//! - [`liveness`] - Connection status policy and the periodic sweeper
//! - [`protocol`] / [`server`] - Wire envelope and TCP accept loop

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod driver;
pub mod error;
pub mod fleet;
pub mod liveness;
pub mod profile;
pub mod protocol;
pub mod server;
pub mod signal;
pub mod store;
pub mod transport;

// Re-export main public types for convenience
pub use driver::{DeviceDriver, DriverConfig, DriverStatus};
pub use error::{FleetError, IngestError, TransportError};
pub use fleet::FleetManager;
pub use liveness::{ConnectionStatus, LivenessPolicy, LivenessSweeper};
pub use profile::{VehicleProfile, VehicleType};
pub use signal::{SignalModel, TelemetrySample};
pub use store::{TelemetryRecord, TelemetryStore};
pub use transport::{StoreTransport, TcpTransport, Transport};
