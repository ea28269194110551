use clap::{App, AppSettings, Arg, SubCommand};
use colored::*;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "5000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("ecubus")
        .version("0.1.0")
        .about("🚗 Query and maintain a vehicle telemetry server")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Server host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Server port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("latest")
                .about("📊 Latest telemetry of every device")
                .long_about("Shows the most recent record of every device including connection status"),
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("📡 Connection status of every device"),
        )
        .subcommand(
            SubCommand::with_name("remove-disconnected")
                .about("🚮 Remove devices that stopped reporting"),
        )
        .subcommand(
            SubCommand::with_name("remove-all")
                .about("🗑️  Remove every device")
                .arg(
                    Arg::with_name("confirm")
                        .long("confirm")
                        .help("Confirm removal of all devices")
                        .required(true),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{}", "🚗 ECU Bus".bright_blue().bold());
        println!("{} {}:{}", "Connecting to".dimmed(), host, port);
    }

    let (op, title) = match matches.subcommand_name() {
        Some("latest") => ("latest", "Latest Telemetry"),
        Some("status") => ("status", "Device Status"),
        Some("remove-disconnected") => ("remove_disconnected", "Remove Disconnected"),
        Some("remove-all") => ("remove_all", "Remove All"),
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            return Ok(());
        }
    };

    let response = send_request(host, port, &json!({ "op": op })).await?;

    match format {
        "json" => println!("{}", response),
        "compact" => print_compact(&response),
        _ => match op {
            "latest" => print_latest_table(&response),
            "status" => print_status_table(&response),
            _ => print_command_result(title, &response),
        },
    }

    Ok(())
}

async fn send_request(host: &str, port: u16, request: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to telemetry server at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Server is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin ecubus-server".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            return Err(e.into());
        }
    };

    let exchange = async {
        let (reader, mut writer) = stream.into_split();
        writer.write_all(request.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut line = String::new();
        let n = BufReader::new(reader).read_line(&mut line).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Server closed connection",
            ));
        }
        Ok::<String, std::io::Error>(line)
    };

    match tokio::time::timeout(REQUEST_TIMEOUT, exchange).await {
        Ok(line) => Ok(serde_json::from_str(line?.trim())?),
        Err(_) => {
            eprintln!("{} Request timed out after {:?}", "⏰".yellow(), REQUEST_TIMEOUT);
            Err("Request timeout".into())
        }
    }
}

fn print_compact(response: &Value) {
    match response["devices"].as_object() {
        Some(devices) => println!("{} devices", devices.len().to_string().bright_cyan()),
        None => println!("{}", response["message"].as_str().unwrap_or("OK").bright_green()),
    }
}

fn print_command_result(action: &str, response: &Value) {
    let message = response["message"].as_str().unwrap_or("");
    match response["status"].as_str().unwrap_or("unknown") {
        "success" => println!("{} {}: {}", "✅".green(), action.bright_white(), message.bright_green()),
        "info" => println!("{} {}: {}", "ℹ️ ".blue(), action.bright_white(), message),
        _ => println!("{} {} failed: {}", "❌".red(), action.bright_white(), message.bright_red()),
    }

    if let Some(removed) = response["removed_devices"].as_array() {
        for device in removed.iter().filter_map(Value::as_str) {
            println!("   {} {}", "🚮".dimmed(), device);
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn connection_label(connected: bool) -> ColoredString {
    if connected {
        "connected".bright_green()
    } else {
        "disconnected".bright_red()
    }
}

fn print_latest_table(response: &Value) {
    let Some(devices) = response["devices"].as_object() else {
        print_command_result("Latest Telemetry", response);
        return;
    };

    println!("{}", "┌──────────────┬───────┬────────┬───────┬──────────┬─────────┬──────┬────────┬──────────────┬────────┐".bright_white());
    println!("{}", "│ Device       │  RPM  │ km/h   │ Temp  │ Throttle │ Voltage │ Gear │ Fuel % │ Status       │ Seen s │".bright_white());
    println!("{}", "├──────────────┼───────┼────────┼───────┼──────────┼─────────┼──────┼────────┼──────────────┼────────┤".bright_white());

    for (device_id, record) in devices {
        let connected = record["connection_status"].as_str() == Some("connected");
        println!(
            "│ {:<12} │ {:>5} │ {:>6} │ {:>5} │ {:>8} │ {:>7} │ {:>4} │ {:>6} │ {:<12} │ {:>6} │",
            device_id,
            cell(&record["rpm"]),
            cell(&record["speed"]),
            cell(&record["temp_motor"]),
            cell(&record["throttle_pos"]),
            cell(&record["voltage"]),
            cell(&record["gear"]),
            cell(&record["fuel_level"]),
            connection_label(connected),
            cell(&record["last_seen_seconds"]),
        );
    }

    println!("{}", "└──────────────┴───────┴────────┴───────┴──────────┴─────────┴──────┴────────┴──────────────┴────────┘".bright_white());
}

fn print_status_table(response: &Value) {
    let Some(devices) = response["devices"].as_object() else {
        print_command_result("Device Status", response);
        return;
    };

    println!("\n{}", "📡 Device Connection Status".bright_blue().bold());
    println!("{}", "═══════════════════════════".bright_blue());
    for (device_id, status) in devices {
        let connected = status["connected"].as_bool().unwrap_or(false);
        let last_seen = status["last_seen"]
            .as_f64()
            .map_or_else(|| "never".to_string(), |s| format!("{:.1}s ago", s));
        println!(
            "{:<14} {:<14} {:<12} last update {}",
            device_id.bright_white(),
            connection_label(connected),
            last_seen,
            status["last_update"].as_str().unwrap_or("N/A").dimmed()
        );
    }
}
