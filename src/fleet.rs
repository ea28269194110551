use crate::driver::{DeviceDriver, DriverConfig, DriverStats, DriverStatus, StopOutcome};
use crate::error::FleetError;
use crate::profile::VehicleType;
use crate::transport::Transport;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{info, warn};

pub const MONITOR_PERIOD: Duration = Duration::from_secs(10);
pub const MIN_RECOMMENDED_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub stopped: Vec<String>,
    pub abandoned: Vec<String>,
}

impl StopReport {
    pub fn total(&self) -> usize {
        self.stopped.len() + self.abandoned.len()
    }
}

/// Owns a set of simulated devices sharing one transport.
#[derive(Debug)]
pub struct FleetManager {
    drivers: BTreeMap<String, DeviceDriver>,
    transport: Arc<dyn Transport>,
    driver_config: DriverConfig,
    monitor_period: Duration,
}

impl FleetManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            drivers: BTreeMap::new(),
            transport,
            driver_config: DriverConfig::default(),
            monitor_period: MONITOR_PERIOD,
        }
    }

    pub fn with_driver_config(mut self, config: DriverConfig) -> Self {
        self.driver_config = config;
        self
    }

    pub fn with_monitor_period(mut self, period: Duration) -> Self {
        self.monitor_period = period;
        self
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }

    pub fn driver(&self, device_id: &str) -> Option<&DeviceDriver> {
        self.drivers.get(device_id)
    }

    /// Create `count` devices. Without explicit types each device gets a
    /// random one; a shorter list is repeated round-robin.
    pub fn create(
        &mut self,
        count: usize,
        vehicle_types: Option<&[VehicleType]>,
    ) -> Result<Vec<String>, FleetError> {
        if count < 1 {
            return Err(FleetError::NoDevices);
        }

        let assigned: Vec<VehicleType> = match vehicle_types {
            Some(types) if !types.is_empty() => types.iter().copied().cycle().take(count).collect(),
            _ => {
                let mut rng = rand::thread_rng();
                (0..count).map(|_| VehicleType::random(&mut rng)).collect()
            }
        };

        let offset = self.drivers.len();
        let mut device_ids = Vec::with_capacity(count);
        for (index, vehicle_type) in assigned.into_iter().enumerate() {
            let device_id = format!("Truck_{:03}", offset + index + 1);
            let driver = DeviceDriver::new(
                device_id.clone(),
                vehicle_type.profile(),
                Arc::clone(&self.transport),
            )
            .with_config(self.driver_config.clone());

            self.drivers.insert(device_id.clone(), driver);
            device_ids.push(device_id);
        }

        info!("🚚 Created {} simulated devices", count);
        Ok(device_ids)
    }

    /// Start every driver with the same send interval. Must be called from
    /// within a tokio runtime.
    pub fn start_all(&mut self, interval: Duration) -> Result<(), FleetError> {
        if interval.is_zero() {
            return Err(FleetError::InvalidInterval(interval));
        }
        if interval < MIN_RECOMMENDED_INTERVAL {
            warn!(
                "Interval {:?} is very short (< {:?}) and may overload the server",
                interval, MIN_RECOMMENDED_INTERVAL
            );
        }

        for driver in self.drivers.values_mut() {
            driver.start(interval);
        }
        info!("All {} devices started", self.drivers.len());
        Ok(())
    }

    /// Signal every driver first, then join each with its own timeout.
    pub async fn stop_all(&mut self) -> StopReport {
        for driver in self.drivers.values_mut() {
            driver.signal_stop();
        }

        let mut report = StopReport::default();
        for (device_id, driver) in &mut self.drivers {
            match driver.stop().await {
                StopOutcome::Joined | StopOutcome::NotRunning => report.stopped.push(device_id.clone()),
                StopOutcome::Abandoned => report.abandoned.push(device_id.clone()),
            }
        }

        if report.abandoned.is_empty() {
            info!("All devices stopped");
        } else {
            warn!("{} devices abandoned during shutdown", report.abandoned.len());
        }
        report
    }

    pub fn status(&self) -> BTreeMap<String, DriverStatus> {
        self.drivers
            .iter()
            .map(|(device_id, driver)| (device_id.clone(), driver.status()))
            .collect()
    }

    pub fn stats(&self) -> BTreeMap<String, DriverStats> {
        self.drivers
            .iter()
            .map(|(device_id, driver)| (device_id.clone(), driver.stats()))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.drivers.values().filter(|d| d.is_running()).count()
    }

    /// Report the active-driver count every monitor period until `duration`
    /// elapses or `cancel` resolves. Always stops the fleet before returning.
    pub async fn monitor<F>(&mut self, duration: Option<Duration>, cancel: F) -> StopReport
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let deadline = duration.map(|d| started + d);
        tokio::pin!(cancel);

        let mut ticker = time::interval_at(started + self.monitor_period, self.monitor_period);

        loop {
            let deadline_reached = async {
                match deadline {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = &mut cancel => {
                    info!("Monitoring interrupted");
                    break;
                }
                () = deadline_reached => {
                    info!("Monitoring duration reached");
                    break;
                }
                _ = ticker.tick() => {
                    info!("📊 Monitor: {}/{} devices active", self.active_count(), self.drivers.len());
                }
            }
        }

        self.stop_all().await
    }
}
