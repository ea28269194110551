use clap::{App, Arg};
use colored::*;
use ecubus::liveness::{LivenessPolicy, LivenessSweeper, DEFAULT_SWEEP_PERIOD};
use ecubus::server::{self, DEFAULT_PORT};
use ecubus::store::TelemetryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let default_port = DEFAULT_PORT.to_string();
    let matches = App::new("ecubus-server")
        .version("0.1.0")
        .about("🚗 Vehicle telemetry ingest server with liveness tracking")
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Address to bind")
                .takes_value(true)
                .default_value("0.0.0.0"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Port to listen on")
                .takes_value(true)
                .default_value(&default_port),
        )
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .value_name("SECONDS")
                .help("Seconds of silence before a device is considered disconnected")
                .takes_value(true)
                .default_value("15")
                .validator(|v| match v.parse::<u64>() {
                    Ok(secs) if secs > 0 => Ok(()),
                    _ => Err("Timeout must be a positive number of seconds".into()),
                }),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every ingest and sweep"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let host = matches.value_of("host").unwrap_or("0.0.0.0");
    let port = matches.value_of("port").unwrap_or("5000").parse::<u16>()?;
    let timeout_secs = matches.value_of("timeout").unwrap_or("15").parse::<u64>()?;

    let policy = LivenessPolicy::new(Duration::from_secs(timeout_secs));
    let store = Arc::new(TelemetryStore::with_policy(policy));
    let sweeper = LivenessSweeper::start(Arc::clone(&store), DEFAULT_SWEEP_PERIOD);

    let listener = TcpListener::bind((host, port)).await?;

    println!("{}", "=".repeat(60).bright_white());
    println!("{}", "🚀 Telemetry server started!".bright_green().bold());
    println!("📡 Monitoring connections with a {} second timeout", timeout_secs);
    println!("🌐 Listening on {}:{}", host, port);
    println!("🛑 Press Ctrl+C to stop the server");
    println!("{}", "=".repeat(60).bright_white());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_store = Arc::clone(&store);
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, server_store, shutdown_rx).await {
            error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("\n{}", "⚠️  Shutting down server...".yellow());

    let _ = shutdown_tx.send(true);
    let sweeps = sweeper.shutdown().await;
    if let Err(e) = server_task.await {
        error!("Server task failed: {}", e);
    }

    info!("Liveness sweeper ran {} times", sweeps);
    println!("{}", "✅ Server stopped.".bright_green());
    Ok(())
}
