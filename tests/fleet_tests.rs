use async_trait::async_trait;
use ecubus::driver::{DriverConfig, DriverStatus};
use ecubus::fleet::FleetManager;
use ecubus::liveness::ConnectionStatus;
use ecubus::profile::VehicleType;
use ecubus::signal::TelemetrySample;
use ecubus::store::TelemetryStore;
use ecubus::transport::{StoreTransport, Transport};
use ecubus::{FleetError, TransportError};
use std::sync::Arc;
use std::time::Duration;

fn local_fleet(store: &Arc<TelemetryStore>) -> FleetManager {
    FleetManager::new(Arc::new(StoreTransport::new(Arc::clone(store))))
        .with_driver_config(DriverConfig::default().ideal_link())
        .with_monitor_period(Duration::from_millis(100))
}

#[tokio::test]
async fn test_fleet_populates_store() {
    let store = Arc::new(TelemetryStore::new());
    let mut fleet = local_fleet(&store);

    let ids = fleet
        .create(3, Some([VehicleType::Sedan, VehicleType::Sport].as_slice()))
        .unwrap();
    assert_eq!(ids, vec!["Truck_001", "Truck_002", "Truck_003"]);

    fleet.start_all(Duration::from_millis(50)).unwrap();
    assert_eq!(fleet.active_count(), 3);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = fleet.stop_all().await;

    assert_eq!(report.total(), 3);
    assert!(report.abandoned.is_empty());
    assert_eq!(fleet.active_count(), 0);

    let records = store.read_all();
    assert_eq!(records.len(), 3);
    for (device_id, record) in &records {
        assert_eq!(record.connection_status(), Some(ConnectionStatus::Connected), "{device_id}");
        assert!(record.get("rpm").is_some());
        assert!(record.get("device_id").is_none());
    }

    for stats in fleet.stats().values() {
        assert!(stats.sent >= 1);
        assert_eq!(stats.failed, 0);
    }
}

#[tokio::test]
async fn test_monitor_stops_fleet_after_duration() {
    let store = Arc::new(TelemetryStore::new());
    let mut fleet = local_fleet(&store);
    fleet.create(2, None).unwrap();
    fleet.start_all(Duration::from_millis(40)).unwrap();

    let report = fleet
        .monitor(Some(Duration::from_millis(350)), std::future::pending::<()>())
        .await;

    assert_eq!(report.stopped.len(), 2);
    assert!(fleet.status().values().all(|s| *s == DriverStatus::Stopped));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_monitor_stops_fleet_on_cancel() {
    let store = Arc::new(TelemetryStore::new());
    let mut fleet = local_fleet(&store);
    fleet.create(2, Some([VehicleType::Hatch].as_slice())).unwrap();
    fleet.start_all(Duration::from_millis(40)).unwrap();

    let cancel = tokio::time::sleep(Duration::from_millis(150));
    let report = fleet.monitor(None, cancel).await;

    assert_eq!(report.total(), 2);
    assert_eq!(fleet.active_count(), 0);
}

#[tokio::test]
async fn test_stop_interrupts_long_interval() {
    let store = Arc::new(TelemetryStore::new());
    let mut fleet = local_fleet(&store);
    fleet.create(4, None).unwrap();
    fleet.start_all(Duration::from_secs(60)).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = std::time::Instant::now();
    let report = fleet.stop_all().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.stopped.len(), 4);
    // Exactly one sample each before the long wait.
    for stats in fleet.stats().values() {
        assert_eq!(stats.sent, 1);
    }
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let store = Arc::new(TelemetryStore::new());
    let mut fleet = local_fleet(&store);
    fleet.create(1, None).unwrap();

    assert_eq!(
        fleet.start_all(Duration::ZERO),
        Err(FleetError::InvalidInterval(Duration::ZERO))
    );
    assert_eq!(fleet.active_count(), 0);
}

#[tokio::test]
async fn test_restarted_fleet_keeps_reporting() {
    let store = Arc::new(TelemetryStore::new());
    let mut fleet = local_fleet(&store);
    fleet.create(1, Some([VehicleType::Suv].as_slice())).unwrap();

    fleet.start_all(Duration::from_millis(30)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    fleet.stop_all().await;
    let first = fleet.stats()["Truck_001"].sent;

    fleet.start_all(Duration::from_millis(30)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    fleet.stop_all().await;

    assert!(fleet.stats()["Truck_001"].sent > first);
}

struct StalledLink;

#[async_trait]
impl Transport for StalledLink {
    async fn send(&self, _device_id: &str, _sample: &TelemetrySample) -> Result<(), TransportError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_stuck_devices_are_reported_abandoned() {
    let config = DriverConfig {
        stop_timeout: Duration::from_millis(50),
        ..DriverConfig::default().ideal_link()
    };
    let mut fleet = FleetManager::new(Arc::new(StalledLink)).with_driver_config(config);
    fleet.create(2, Some([VehicleType::Sedan].as_slice())).unwrap();
    fleet.start_all(Duration::from_millis(20)).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = std::time::Instant::now();
    let report = fleet.stop_all().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.stopped.is_empty());
    assert_eq!(report.abandoned, vec!["Truck_001", "Truck_002"]);
    assert_eq!(report.total(), 2);
}
