//! Stream gaze points as JSON lines for downstream tools.
//!
//! Outputs one JSON object per valid sample:
//!
//! {"x":961.2,"y":538.7,"i":1042,"t":1596314}
//!
//! Usage: cargo run --release --example stream_json
//! Set EYELOGIC_SIMULATE=1 to run against the in-process simulator.

use eyelogic::sim::{SimConfig, SimServer};
use eyelogic::{config, ClientConfig, ConnectResult, Event, TrackerClient, TrackingResult};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    env_logger::init();

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

    if let Err(e) = client.init("eyelogic-stream-json", Arc::new(sink)) {
        eprintln!("Failed to initialise: {}", e);
        std::process::exit(1);
    }
    if !matches!(client.connect(), Ok(ConnectResult::Success)) {
        eprintln!("Failed to connect to EyeLogic server");
        std::process::exit(1);
    }
    match client.request_tracking(0) {
        Ok(TrackingResult::Success) => {}
        other => {
            eprintln!("Failed to start tracking: {:?}", other);
            std::process::exit(1);
        }
    }

    eprintln!("Streaming JSON (Ctrl+C to stop)...");

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let mut idle_timeouts: u32 = 0;

    loop {
        match stream.recv_timeout(Duration::from_secs(2)) {
            Ok(Event::GazeSample(sample)) => {
                idle_timeouts = 0;
                let Some(por) = sample.por() else {
                    continue;
                };
                let _ = writeln!(
                    out,
                    "{{\"x\":{:.1},\"y\":{:.1},\"i\":{},\"t\":{}}}",
                    por.x, por.y, sample.index, sample.timestamp_micros,
                );
                let _ = out.flush();
            }
            Ok(Event::ConnectionClosed) => {
                eprintln!("Server closed the connection");
                break;
            }
            Ok(Event::TrackingStopped) => {
                eprintln!("Tracking stopped by server");
                break;
            }
            Ok(_) => {}
            Err(eyelogic::EyeLogicError::Timeout) => {
                idle_timeouts += 1;
                eprintln!("No gaze sample for 2s (timeout #{})", idle_timeouts);
                if idle_timeouts >= 15 {
                    eprintln!("Stopping after 30s without gaze samples");
                    break;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    client.unrequest_tracking();
    client.disconnect();
}
