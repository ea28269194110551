use core::fmt;
use core::str::FromStr;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Sedan,
    Suv,
    Pickup,
    Hatch,
    Sport,
}

impl VehicleType {
    pub const ALL: [VehicleType; 5] = [
        VehicleType::Sedan,
        VehicleType::Suv,
        VehicleType::Pickup,
        VehicleType::Hatch,
        VehicleType::Sport,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VehicleType::Sedan => "Sedan",
            VehicleType::Suv => "SUV",
            VehicleType::Pickup => "Pickup",
            VehicleType::Hatch => "Hatch",
            VehicleType::Sport => "Sport",
        }
    }

    pub fn profile(self) -> VehicleProfile {
        VehicleProfile::for_type(self)
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // ALL is non-empty
        *Self::ALL.choose(rng).unwrap_or(&VehicleType::Sedan)
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown vehicle type: {0}")]
pub struct UnknownVehicleType(pub String);

impl FromStr for VehicleType {
    type Err = UnknownVehicleType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sedan" => Ok(VehicleType::Sedan),
            "suv" => Ok(VehicleType::Suv),
            "pickup" => Ok(VehicleType::Pickup),
            "hatch" => Ok(VehicleType::Hatch),
            "sport" | "esportivo" => Ok(VehicleType::Sport),
            other => Err(UnknownVehicleType(other.to_string())),
        }
    }
}

/// Inclusive range of plausible values for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub min: f64,
    pub max: f64,
}

impl MetricRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.gen_range(self.min..=self.max)
    }
}

/// Immutable bundle of ranges bounding the signals generated for one vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub vehicle_type: VehicleType,
    pub rpm_range: MetricRange,
    pub speed_range: MetricRange,
    pub temp_range: MetricRange,
    pub max_gear: u8,
    pub rpm_multiplier: f64,
}

impl VehicleProfile {
    pub fn for_type(vehicle_type: VehicleType) -> Self {
        let (rpm, speed, temp, max_gear, rpm_multiplier) = match vehicle_type {
            VehicleType::Sedan => ((800.0, 3500.0), (30.0, 120.0), (85.0, 95.0), 6, 1.0),
            VehicleType::Suv => ((900.0, 3200.0), (20.0, 100.0), (88.0, 98.0), 6, 1.0),
            VehicleType::Pickup => ((1000.0, 3800.0), (25.0, 110.0), (90.0, 105.0), 5, 1.2),
            VehicleType::Hatch => ((850.0, 4500.0), (35.0, 140.0), (82.0, 92.0), 5, 1.0),
            VehicleType::Sport => ((1200.0, 7000.0), (40.0, 180.0), (90.0, 110.0), 7, 1.5),
        };

        Self {
            vehicle_type,
            rpm_range: MetricRange::new(rpm.0, rpm.1),
            speed_range: MetricRange::new(speed.0, speed.1),
            temp_range: MetricRange::new(temp.0, temp.1),
            max_gear,
            rpm_multiplier,
        }
    }

    pub fn max_rpm(&self) -> f64 {
        self.rpm_range.max
    }

    pub fn max_speed(&self) -> f64 {
        self.speed_range.max
    }

    pub fn min_temp(&self) -> f64 {
        self.temp_range.min
    }

    /// Engine temperature may overshoot the nominal range by 10 degrees.
    pub fn temp_ceiling(&self) -> f64 {
        self.temp_range.max + 10.0
    }
}

impl Default for VehicleProfile {
    fn default() -> Self {
        Self::for_type(VehicleType::Sedan)
    }
}
