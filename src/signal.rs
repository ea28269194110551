//! Correlated engine signal generation.
//!
//! Each tick advances throttle first, then rpm from throttle, speed from rpm,
//! gear from speed, and finally temperature, battery voltage and fuel from
//! rpm and speed together. Every metric is clamped to the vehicle profile.

use crate::profile::{MetricRange, VehicleProfile};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DRIVING_CYCLE_S: f64 = 300.0;
const THROTTLE_STEP: f64 = 5.0;
const THROTTLE_RANGE: MetricRange = MetricRange::new(0.0, 100.0);

const RPM_SMOOTHING: f64 = 0.1;
const RPM_NOISE: f64 = 50.0;

const SPEED_SMOOTHING: f64 = 0.05;
const SPEED_NOISE: f64 = 2.0;
const SPEED_PER_RPM: f64 = 1.0 / 3000.0;

const HEATING_PER_RPM: f64 = 10.0 / 3000.0;
const COOLING_PER_KMH: f64 = 8.0 / 100.0;
const TEMP_NOISE: f64 = 1.0;

const VOLTAGE_NOMINAL: f64 = 13.8;
const VOLTAGE_DROP_PER_RPM: f64 = 0.5 / 5000.0;
const VOLTAGE_NOISE: f64 = 0.1;
const VOLTAGE_RANGE: MetricRange = MetricRange::new(11.5, 14.5);

const FUEL_PER_RPM: f64 = 0.01 / 3000.0;

// Upper speed bound (exclusive) for gears 1..=6; anything faster is gear 7.
const GEAR_THRESHOLDS_KMH: [f64; 6] = [20.0, 40.0, 60.0, 80.0, 100.0, 120.0];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorState {
    pub rpm_base: f64,
    pub speed_base: f64,
    pub temp_base: f64,
    pub throttle_base: f64,
    pub fuel_level: f64,
    pub voltage_base: f64,
    pub gear: u8,
}

impl SimulatorState {
    pub fn randomized<R: Rng + ?Sized>(profile: &VehicleProfile, rng: &mut R) -> Self {
        Self {
            rpm_base: profile.rpm_range.sample(rng),
            speed_base: profile.speed_range.sample(rng),
            temp_base: profile.temp_range.sample(rng),
            throttle_base: rng.gen_range(10.0..=40.0),
            fuel_level: rng.gen_range(30.0..=100.0),
            voltage_base: rng.gen_range(12.5..=13.5),
            gear: 3,
        }
    }
}

/// One point-in-time reading as a device would report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub rpm: u32,
    pub speed: f64,
    pub temp_motor: f64,
    pub throttle_pos: f64,
    pub voltage: f64,
    pub gear: u8,
    pub fuel_level: f64,
    pub timestamp: String,
}

impl TelemetrySample {
    /// Ingest payload for this sample, tagged with the reporting device.
    pub fn to_payload(&self, device_id: &str) -> Map<String, Value> {
        let mut payload = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        payload.insert("device_id".into(), Value::String(device_id.to_string()));
        payload
    }
}

/// Speed-bucket gear selection, capped by what the gearbox offers.
pub fn gear_for_speed(speed_kmh: f64, max_gear: u8) -> u8 {
    let bucket = GEAR_THRESHOLDS_KMH
        .iter()
        .position(|&limit| speed_kmh < limit)
        .map_or(7, |index| index as u8 + 1);
    bucket.min(max_gear.max(1))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug)]
pub struct SignalModel {
    profile: VehicleProfile,
    state: SimulatorState,
    rng: StdRng,
}

impl SignalModel {
    pub fn new(profile: VehicleProfile) -> Self {
        Self::from_rng(profile, StdRng::from_entropy())
    }

    pub fn with_seed(profile: VehicleProfile, seed: u64) -> Self {
        Self::from_rng(profile, StdRng::seed_from_u64(seed))
    }

    fn from_rng(profile: VehicleProfile, mut rng: StdRng) -> Self {
        let state = SimulatorState::randomized(&profile, &mut rng);
        Self { profile, state, rng }
    }

    pub fn profile(&self) -> &VehicleProfile {
        &self.profile
    }

    pub fn state(&self) -> &SimulatorState {
        &self.state
    }

    /// Advance the model one tick. `elapsed_s` is the time since the model
    /// started and only drives the slow driving-cycle oscillator.
    pub fn next_sample(&mut self, elapsed_s: f64) -> TelemetrySample {
        self.step_throttle(elapsed_s);
        self.step_rpm();
        self.step_speed();
        self.state.gear = gear_for_speed(self.state.speed_base, self.profile.max_gear);
        self.step_temperature();
        self.step_voltage();
        self.step_fuel();

        debug_assert!(
            self.profile.rpm_range.contains(self.state.rpm_base),
            "RPM {} outside profile range",
            self.state.rpm_base
        );
        debug_assert!(
            self.state.speed_base >= 0.0 && self.state.speed_base <= self.profile.max_speed(),
            "Speed {} outside profile range",
            self.state.speed_base
        );
        debug_assert!(
            self.state.fuel_level >= 0.0,
            "Fuel level {} below empty",
            self.state.fuel_level
        );

        self.snapshot()
    }

    fn step_throttle(&mut self, elapsed_s: f64) {
        // Slow sawtooth over the driving cycle widens the walk over time
        let cycle = elapsed_s.rem_euclid(DRIVING_CYCLE_S) / DRIVING_CYCLE_S;
        let variation = 0.75 + 0.25 * cycle;
        let step = self.rng.gen_range(-THROTTLE_STEP..=THROTTLE_STEP) * variation;
        self.state.throttle_base = THROTTLE_RANGE.clamp(self.state.throttle_base + step);
    }

    fn step_rpm(&mut self) {
        // Throttle position sets the rpm the engine is heading for
        let target = (self.state.throttle_base / 100.0)
            * self.profile.max_rpm()
            * self.profile.rpm_multiplier;
        // Exponential smoothing keeps rpm from jumping between ticks
        let smoothed = self.state.rpm_base * (1.0 - RPM_SMOOTHING) + target * RPM_SMOOTHING;
        let noise = self.rng.gen_range(-RPM_NOISE..=RPM_NOISE);
        self.state.rpm_base = self.profile.rpm_range.clamp(smoothed + noise);
    }

    fn step_speed(&mut self) {
        // Speed lags rpm more than rpm lags throttle
        let target = self.state.rpm_base * SPEED_PER_RPM * self.profile.max_speed();
        let smoothed =
            self.state.speed_base * (1.0 - SPEED_SMOOTHING) + target * SPEED_SMOOTHING;
        let noise = self.rng.gen_range(-SPEED_NOISE..=SPEED_NOISE);
        self.state.speed_base = (smoothed + noise).clamp(0.0, self.profile.max_speed());
    }

    fn step_temperature(&mut self) {
        // Engine load heats, airflow at speed cools
        let heating = self.state.rpm_base * HEATING_PER_RPM;
        let cooling = self.state.speed_base * COOLING_PER_KMH;
        let noise = self.rng.gen_range(-TEMP_NOISE..=TEMP_NOISE);
        let temp = self.profile.min_temp() + heating - cooling + noise;
        // Floor at the profile minimum, allow overshoot up to the ceiling
        self.state.temp_base = temp.clamp(self.profile.min_temp(), self.profile.temp_ceiling());
    }

    fn step_voltage(&mut self) {
        // Alternator output sags slightly at high rpm
        let drop = self.state.rpm_base * VOLTAGE_DROP_PER_RPM;
        let noise = self.rng.gen_range(-VOLTAGE_NOISE..=VOLTAGE_NOISE);
        self.state.voltage_base = VOLTAGE_RANGE.clamp(VOLTAGE_NOMINAL - drop + noise);
    }

    fn step_fuel(&mut self) {
        // rpm is already clamped, so consumption is never negative
        let consumption = self.state.rpm_base * FUEL_PER_RPM;
        self.state.fuel_level = (self.state.fuel_level - consumption).max(0.0);
    }

    fn snapshot(&self) -> TelemetrySample {
        TelemetrySample {
            rpm: self.state.rpm_base as u32,
            speed: round_to(self.state.speed_base, 1),
            temp_motor: round_to(self.state.temp_base, 1),
            throttle_pos: round_to(self.state.throttle_base, 1),
            voltage: round_to(self.state.voltage_base, 2),
            gear: self.state.gear,
            fuel_level: round_to(self.state.fuel_level, 1),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}
