use crate::store::TelemetryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_STALE_FACTOR: u32 = 4;
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

/// Derived view of one device's connectivity at a given instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Liveness {
    pub status: ConnectionStatus,
    pub last_seen_seconds: f64,
    /// Silent for longer than the stale threshold (timeout x stale factor).
    pub stale: bool,
}

/// Fixed thresholds turning elapsed silence into a connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessPolicy {
    pub timeout: Duration,
    pub stale_factor: u32,
}

impl LivenessPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            stale_factor: DEFAULT_STALE_FACTOR,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.timeout * self.stale_factor
    }

    pub fn evaluate(&self, elapsed: Duration) -> Liveness {
        let status = if elapsed < self.timeout {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };

        Liveness {
            status,
            last_seen_seconds: round_tenths(elapsed.as_secs_f64()),
            stale: elapsed > self.stale_after(),
        }
    }

    /// Eviction shares the display timeout: a device is removable once its
    /// silence strictly exceeds it.
    pub fn is_evictable(&self, elapsed: Duration) -> bool {
        elapsed > self.timeout
    }
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_TIMEOUT)
    }
}

pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Periodic task re-evaluating every record in a store.
///
/// Started once; [`LivenessSweeper::shutdown`] consumes the handle so the
/// task is cancelled exactly once. Dropping the sweeper also signals the task.
#[derive(Debug)]
pub struct LivenessSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<u64>>,
}

impl LivenessSweeper {
    /// Must be called from within a tokio runtime.
    pub fn start(store: Arc<TelemetryStore>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_loop(store, period, shutdown_rx));
        info!("⏱️  Liveness sweeper started (period {:?})", period);

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the periodic task and wait for it. Returns the number of sweeps run.
    pub async fn shutdown(mut self) -> u64 {
        let _ = self.shutdown_tx.send(true);
        let Some(handle) = self.handle.take() else {
            return 0;
        };

        match handle.await {
            Ok(sweeps) => {
                info!("⏱️  Liveness sweeper stopped after {} sweeps", sweeps);
                sweeps
            }
            Err(e) => {
                warn!("Liveness sweeper task ended abnormally: {}", e);
                0
            }
        }
    }
}

impl Drop for LivenessSweeper {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn sweep_loop(
    store: Arc<TelemetryStore>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweeps = 0u64;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = interval.tick() => {
                let updated = store.sweep();
                sweeps += 1;
                debug!("Liveness sweep #{} refreshed {} records", sweeps, updated);
            }
            changed = shutdown_rx.changed() => {
                // Sender gone counts as shutdown.
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    sweeps
}
