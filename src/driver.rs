use crate::error::TransportError;
use crate::profile::VehicleProfile;
use crate::signal::{SignalModel, TelemetrySample};
use crate::transport::Transport;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(10);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const SIMULATED_LOSS_PROBABILITY: f64 = 0.01;

// Roughly one sample in ten is logged at info level.
const SAMPLE_LOG_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub interval: Duration,
    pub max_consecutive_failures: u32,
    pub failure_backoff: Duration,
    pub stop_timeout: Duration,
    pub simulated_loss: f64,
    pub latency_min: Duration,
    pub latency_max: Duration,
}

impl DriverConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Config with no simulated link effects; useful against a local store.
    pub fn ideal_link(mut self) -> Self {
        self.simulated_loss = 0.0;
        self.latency_min = Duration::ZERO;
        self.latency_max = Duration::ZERO;
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SEND_INTERVAL,
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
            failure_backoff: FAILURE_BACKOFF,
            stop_timeout: STOP_TIMEOUT,
            simulated_loss: SIMULATED_LOSS_PROBABILITY,
            latency_min: Duration::from_millis(10),
            latency_max: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriverStats {
    pub sent: u64,
    pub failed: u64,
    pub backoffs: u64,
}

#[derive(Debug, Default)]
struct DriverCounters {
    sent: AtomicU64,
    failed: AtomicU64,
    backoffs: AtomicU64,
}

impl DriverCounters {
    fn snapshot(&self) -> DriverStats {
        DriverStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop observed the stop signal and exited.
    Joined,
    /// The loop did not exit in time and was detached.
    Abandoned,
    /// The driver was never started.
    NotRunning,
}

/// One simulated device: an independent generate, transmit, wait loop.
pub struct DeviceDriver {
    device_id: String,
    profile: VehicleProfile,
    transport: Arc<dyn Transport>,
    config: DriverConfig,
    running: Arc<AtomicBool>,
    counters: Arc<DriverCounters>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for DeviceDriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceDriver")
            .field("device_id", &self.device_id)
            .field("vehicle_type", &self.profile.vehicle_type)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl DeviceDriver {
    pub fn new(
        device_id: impl Into<String>,
        profile: VehicleProfile,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let device_id = device_id.into();
        info!("🚗 Device {} initialized ({})", device_id, profile.vehicle_type);

        Self {
            device_id,
            profile,
            transport,
            config: DriverConfig::default(),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(DriverCounters::default()),
            stop_tx: None,
            handle: None,
        }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn profile(&self) -> &VehicleProfile {
        &self.profile
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> DriverStatus {
        if self.is_running() {
            DriverStatus::Running
        } else {
            DriverStatus::Stopped
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.counters.snapshot()
    }

    /// Spawn the device loop. A fresh, randomly seeded signal model is created
    /// for every start and dropped when the loop exits. Must be called from
    /// within a tokio runtime; starting a running driver is a no-op.
    pub fn start(&mut self, interval: Duration) {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Device {} already running", self.device_id);
            return;
        }

        self.config.interval = interval;
        let (stop_tx, stop_rx) = watch::channel(false);
        // Each loop owns its flag; an abandoned loop exiting late must not
        // mark its successor stopped.
        self.running = Arc::new(AtomicBool::new(true));

        let device_loop = DeviceLoop {
            device_id: self.device_id.clone(),
            model: SignalModel::new(self.profile),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            running: Arc::clone(&self.running),
            counters: Arc::clone(&self.counters),
            stop_rx,
        };

        self.handle = Some(tokio::spawn(device_loop.run()));
        self.stop_tx = Some(stop_tx);
        info!(
            "▶️  Device {} started. Interval: {:?}",
            self.device_id, interval
        );
    }

    /// Raise the stop signal without waiting for the loop.
    pub fn signal_stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = &self.stop_tx {
            let _ = stop_tx.send(true);
        }
    }

    /// Signal the loop and wait up to the stop timeout for it to exit.
    pub async fn stop(&mut self) -> StopOutcome {
        self.signal_stop();
        self.stop_tx = None;

        let Some(handle) = self.handle.take() else {
            return StopOutcome::NotRunning;
        };

        match time::timeout(self.config.stop_timeout, handle).await {
            Ok(Ok(())) => {
                info!("⏹️  Device {} stopped", self.device_id);
                StopOutcome::Joined
            }
            Ok(Err(e)) => {
                warn!("Device {} loop ended abnormally: {}", self.device_id, e);
                StopOutcome::Joined
            }
            Err(_) => {
                warn!(
                    "Device {} did not stop within {:?}; abandoning",
                    self.device_id, self.config.stop_timeout
                );
                StopOutcome::Abandoned
            }
        }
    }
}

struct DeviceLoop {
    device_id: String,
    model: SignalModel,
    transport: Arc<dyn Transport>,
    config: DriverConfig,
    running: Arc<AtomicBool>,
    counters: Arc<DriverCounters>,
    stop_rx: watch::Receiver<bool>,
}

impl DeviceLoop {
    async fn run(mut self) {
        let started = Instant::now();
        let mut consecutive_failures = 0u32;

        while !*self.stop_rx.borrow() {
            // Generate the next correlated reading
            let sample = self.model.next_sample(started.elapsed().as_secs_f64());
            self.log_sample(&sample);

            match self.transmit(&sample).await {
                Ok(()) => {
                    // Any success clears the failure streak
                    consecutive_failures = 0;
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                    debug!("Device {}: sample delivered", self.device_id);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Device {}: send failed: {}", self.device_id, e);

                    // Too many in a row: give the link time to recover
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        warn!(
                            "Device {}: {} consecutive failures, backing off for {:?}",
                            self.device_id, consecutive_failures, self.config.failure_backoff
                        );
                        self.counters.backoffs.fetch_add(1, Ordering::Relaxed);
                        consecutive_failures = 0;
                        if self.pause(self.config.failure_backoff).await {
                            break;
                        }
                    }
                }
            }

            // Wait for the next send slot, waking early on stop
            if self.pause(self.config.interval).await {
                break;
            }
        }

        // Only this loop's flag; a newer start owns a different one
        self.running.store(false, Ordering::SeqCst);
        debug!("Device {}: loop exited", self.device_id);
    }

    async fn transmit(&mut self, sample: &TelemetrySample) -> Result<(), TransportError> {
        let (latency, lost) = {
            let mut rng = rand::thread_rng();
            let latency = if self.config.latency_max > self.config.latency_min {
                rng.gen_range(self.config.latency_min..=self.config.latency_max)
            } else {
                self.config.latency_min
            };
            (latency, rng.gen_bool(self.config.simulated_loss.clamp(0.0, 1.0)))
        };

        // Simulated network latency
        if !latency.is_zero() {
            time::sleep(latency).await;
        }
        // Simulated packet loss
        if lost {
            return Err(TransportError::SimulatedLoss);
        }

        self.transport.send(&self.device_id, sample).await
    }

    /// Sleep, waking early on stop. Returns true when stop was requested.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            () = time::sleep(duration) => *self.stop_rx.borrow(),
            changed = self.stop_rx.changed() => changed.is_err() || *self.stop_rx.borrow(),
        }
    }

    fn log_sample(&self, sample: &TelemetrySample) {
        if rand::thread_rng().gen_bool(SAMPLE_LOG_PROBABILITY) {
            info!(
                "{}: RPM={}, Speed={}km/h, Temp={}°C, Fuel={}%",
                self.device_id, sample.rpm, sample.speed, sample.temp_motor, sample.fuel_level
            );
        } else {
            debug!("{}: {:?}", self.device_id, sample);
        }
    }
}
