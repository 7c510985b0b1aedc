//! Stream gaze samples from the EyeLogic server to stdout.
//!
//! Usage: cargo run --example stream [frame-rate-mode]
//! Set EYELOGIC_SIMULATE=1 to run against the in-process simulator.
//! Press Ctrl+C to stop.

use eyelogic::sim::{SimConfig, SimServer};
use eyelogic::{config, ClientConfig, ConnectResult, Event, TrackerClient, TrackingResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let mode: i32 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);

    let sim = if config::simulate_requested() {
        match SimServer::new(SimConfig::default()) {
            Ok(server) => Some(server),
            Err(e) => {
                eprintln!("Failed to start simulator: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let config = ClientConfig::from_env();
    let (sink, stream) = config.event_channel();
    let mut client = match &sim {
        Some(server) => TrackerClient::new(server.client()),
        None => TrackerClient::native(config),
    };

    if let Err(e) = client.init("eyelogic-stream", Arc::new(sink)) {
        eprintln!("Failed to initialise: {}", e);
        std::process::exit(1);
    }

    match client.connect() {
        Ok(ConnectResult::Success) => {}
        Ok(other) => {
            eprintln!("Failed to connect: {:?}", other);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    }

    match client.request_tracking(mode) {
        Ok(TrackingResult::Success) => {}
        Ok(other) => {
            eprintln!("Tracking refused: {:?}", other);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to request tracking: {}", e);
            std::process::exit(1);
        }
    }

    println!("Streaming gaze at mode {} (Ctrl+C to stop)...", mode);

    let start = Instant::now();
    let mut count: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        match stream.recv_timeout(Duration::from_secs(2)) {
            Ok(Event::GazeSample(sample)) => {
                count += 1;

                // Print every ~50th sample to avoid flooding the terminal
                if count % 50 == 1 {
                    match sample.por() {
                        Some(por) => println!(
                            "ts={:<12}  #{:<8}  por=[{:8.1}, {:8.1}]  binocular={}",
                            sample.timestamp_micros,
                            sample.index,
                            por.x,
                            por.y,
                            sample.is_binocular(),
                        ),
                        None => println!(
                            "ts={:<12}  #{:<8}  (no gaze)",
                            sample.timestamp_micros, sample.index
                        ),
                    }
                }

                let now = Instant::now();
                if now.duration_since(last_report) >= Duration::from_secs(3) {
                    let elapsed = start.elapsed().as_secs_f64();
                    let stats = client.stats();
                    println!(
                        "--- {} samples in {:.1}s ({:.1} Hz), {} dropped ---",
                        count,
                        elapsed,
                        count as f64 / elapsed,
                        stats.samples_dropped
                    );
                    last_report = now;
                }
            }
            Ok(Event::DeviceConnected(device)) => {
                println!("Device: {} ({})", device.name_lossy(), device.id);
            }
            Ok(Event::ConnectionClosed) => {
                eprintln!("Server closed the connection");
                break;
            }
            Ok(other) => println!("Event: {:?}", other),
            Err(eyelogic::EyeLogicError::Timeout) => {
                eprintln!("Timeout waiting for gaze data");
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    client.unrequest_tracking();
    client.disconnect();

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} samples in {:.1}s ({:.1} Hz)",
        count,
        elapsed,
        count as f64 / elapsed
    );
}
