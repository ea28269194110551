use clap::{App, Arg};
use colored::*;
use ecubus::fleet::FleetManager;
use ecubus::profile::VehicleType;
use ecubus::transport::TcpTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

const DEFAULT_SERVER: &str = "127.0.0.1:5000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("ecubus-sim")
        .version("0.1.0")
        .about("🚚 Simulates a fleet of vehicle ECUs sending telemetry")
        .after_help(
            "EXAMPLES:\n    \
             ecubus-sim --devices 3\n    \
             ecubus-sim --devices 5 --interval 1\n    \
             ecubus-sim --devices 2 --server 192.168.1.100:5000\n    \
             ecubus-sim --devices 4 --types sedan,suv\n\n\
             Vehicle types: sedan, suv, pickup, hatch, sport",
        )
        .arg(
            Arg::with_name("devices")
                .short("d")
                .long("devices")
                .value_name("N")
                .help("Number of devices to simulate")
                .takes_value(true)
                .default_value("3")
                .validator(|v| match v.parse::<usize>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Device count must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("SECONDS")
                .help("Seconds between samples per device")
                .takes_value(true)
                .default_value("2.0")
                .validator(|v| match parse_seconds(&v) {
                    Ok(interval) if !interval.is_zero() => Ok(()),
                    Ok(_) => Err("Interval must be a positive number of seconds".into()),
                    Err(e) => Err(e),
                }),
        )
        .arg(
            Arg::with_name("server")
                .short("s")
                .long("server")
                .value_name("ADDR")
                .help("Ingest server address (host:port)")
                .takes_value(true)
                .default_value(DEFAULT_SERVER),
        )
        .arg(
            Arg::with_name("types")
                .short("t")
                .long("types")
                .value_name("LIST")
                .help("Comma-separated vehicle types: sedan,suv,pickup,hatch,sport")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("duration")
                .short("D")
                .long("duration")
                .value_name("SECONDS")
                .help("Simulation duration in seconds (runs until Ctrl+C if omitted)")
                .takes_value(true)
                .validator(|v| parse_seconds(&v).map(|_| ())),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Verbose output"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let devices = matches.value_of("devices").unwrap_or("3").parse::<usize>()?;
    let interval = parse_seconds(matches.value_of("interval").unwrap_or("2.0"))?;
    let server = matches.value_of("server").unwrap_or(DEFAULT_SERVER);
    let duration = matches.value_of("duration").map(parse_seconds).transpose()?;

    let vehicle_types = parse_vehicle_types(matches.value_of("types").unwrap_or(""));
    if !vehicle_types.is_empty() && vehicle_types.len() < devices {
        warn!(
            "Only {} types given for {} devices; repeating them in order",
            vehicle_types.len(),
            devices
        );
    }

    let transport = Arc::new(TcpTransport::new(server));
    let mut fleet = FleetManager::new(transport);

    let types = if vehicle_types.is_empty() { None } else { Some(vehicle_types.as_slice()) };
    let device_ids = match fleet.create(devices, types) {
        Ok(ids) => ids,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    println!("{}", "=".repeat(60).bright_white());
    println!("{}", "🚚 ECU FLEET SIMULATOR - STARTING".bright_blue().bold());
    println!("{} {}", "Devices:".bright_white(), device_ids.join(", ").bright_cyan());
    println!("{} {:?}", "Interval:".bright_white(), interval);
    println!("{} {}", "Server:".bright_white(), server.bright_cyan());
    match duration {
        Some(d) => println!("{} {:?}", "Duration:".bright_white(), d),
        None => println!("{} {}", "Duration:".bright_white(), "until Ctrl+C".dimmed()),
    }
    println!("{}", "=".repeat(60).bright_white());

    fleet.start_all(interval)?;

    let cancel = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let report = fleet.monitor(duration, cancel).await;

    for (device_id, stats) in fleet.stats() {
        info!(
            "{}: {} sent, {} failed, {} backoffs",
            device_id, stats.sent, stats.failed, stats.backoffs
        );
    }
    if !report.abandoned.is_empty() {
        println!(
            "{} {}",
            "⚠️  Abandoned:".yellow(),
            report.abandoned.join(", ")
        );
    }
    println!("{}", "✅ Simulation finished".bright_green());

    Ok(())
}

/// Seconds as a non-negative float, rejecting values no `Duration` can hold.
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid seconds '{}': {}", value, e))
}

fn parse_vehicle_types(list: &str) -> Vec<VehicleType> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| match name.parse::<VehicleType>() {
            Ok(vehicle_type) => Some(vehicle_type),
            Err(e) => {
                warn!("{}", e);
                None
            }
        })
        .collect()
}
