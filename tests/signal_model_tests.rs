use ecubus::profile::{VehicleProfile, VehicleType};
use ecubus::signal::{gear_for_speed, SignalModel};

const TICKS: u32 = 2_000;
const SEND_INTERVAL_S: f64 = 2.0;

fn run_model(vehicle_type: VehicleType, seed: u64, mut check: impl FnMut(&SignalModel, u32)) {
    let mut model = SignalModel::with_seed(vehicle_type.profile(), seed);
    for tick in 0..TICKS {
        model.next_sample(f64::from(tick) * SEND_INTERVAL_S);
        check(&model, tick);
    }
}

#[test]
fn test_sedan_samples_stay_in_profile() {
    let mut model = SignalModel::with_seed(VehicleType::Sedan.profile(), 11);
    for tick in 0..TICKS {
        let sample = model.next_sample(f64::from(tick) * SEND_INTERVAL_S);
        assert!((800..=3500).contains(&sample.rpm), "rpm {} out of range", sample.rpm);
        assert!((0.0..=120.0).contains(&sample.speed), "speed {} out of range", sample.speed);
        assert!((85.0..=105.0).contains(&sample.temp_motor), "temp {}", sample.temp_motor);
        assert!((0.0..=100.0).contains(&sample.throttle_pos));
        assert!((11.5..=14.5).contains(&sample.voltage), "voltage {}", sample.voltage);
        assert!((1..=6).contains(&sample.gear));
    }
}

#[test]
fn test_every_profile_respects_its_bounds() {
    for vehicle_type in VehicleType::ALL {
        let profile = VehicleProfile::for_type(vehicle_type);
        let mut model = SignalModel::with_seed(profile, 3);
        for tick in 0..TICKS {
            let sample = model.next_sample(f64::from(tick) * SEND_INTERVAL_S);
            let rpm = f64::from(sample.rpm);

            assert!(rpm >= profile.rpm_range.min && rpm <= profile.rpm_range.max, "{vehicle_type}: rpm {rpm}");
            assert!(sample.speed >= 0.0 && sample.speed <= profile.max_speed(), "{vehicle_type}: speed {}", sample.speed);
            assert!(
                sample.temp_motor >= profile.min_temp() && sample.temp_motor <= profile.temp_ceiling(),
                "{vehicle_type}: temp {}",
                sample.temp_motor
            );
            assert!(sample.gear >= 1 && sample.gear <= profile.max_gear, "{vehicle_type}: gear {}", sample.gear);
            assert!(sample.fuel_level >= 0.0 && sample.fuel_level <= 100.0);
        }
    }
}

#[test]
fn test_fuel_never_increases() {
    for vehicle_type in VehicleType::ALL {
        let mut previous = f64::MAX;
        run_model(vehicle_type, 21, |model, _| {
            let fuel = model.state().fuel_level;
            assert!(fuel <= previous, "{vehicle_type}: fuel rose from {previous} to {fuel}");
            previous = fuel;
        });
    }
}

#[test]
fn test_gear_follows_speed() {
    for vehicle_type in VehicleType::ALL {
        let max_gear = vehicle_type.profile().max_gear;
        run_model(vehicle_type, 5, |model, tick| {
            let state = model.state();
            assert_eq!(
                state.gear,
                gear_for_speed(state.speed_base, max_gear),
                "{vehicle_type}: tick {tick} speed {}",
                state.speed_base
            );
        });
    }
}

#[test]
fn test_sport_revs_higher_than_sedan() {
    let average_rpm = |vehicle_type: VehicleType| {
        let mut model = SignalModel::with_seed(vehicle_type.profile(), 99);
        let total: f64 = (0..TICKS)
            .map(|tick| f64::from(model.next_sample(f64::from(tick) * SEND_INTERVAL_S).rpm))
            .sum();
        total / f64::from(TICKS)
    };

    assert!(average_rpm(VehicleType::Sport) > average_rpm(VehicleType::Sedan));
}

#[test]
fn test_different_seeds_diverge() {
    let profile = VehicleType::Suv.profile();
    let mut a = SignalModel::with_seed(profile, 1);
    let mut b = SignalModel::with_seed(profile, 2);
    for tick in 0..20 {
        let t = f64::from(tick) * SEND_INTERVAL_S;
        a.next_sample(t);
        b.next_sample(t);
    }
    assert_ne!(a.state(), b.state());
}

#[test]
fn test_payload_carries_device_id_and_sample() {
    let mut model = SignalModel::with_seed(VehicleType::Pickup.profile(), 8);
    let sample = model.next_sample(0.0);
    let payload = sample.to_payload("Truck_007");

    assert_eq!(payload["device_id"], "Truck_007");
    assert_eq!(payload["rpm"], sample.rpm);
    assert_eq!(payload["gear"], sample.gear);
    assert_eq!(payload["timestamp"], sample.timestamp.as_str());
}
