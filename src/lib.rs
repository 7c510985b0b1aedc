//! # eyelogic - Rust client for the EyeLogic eye-tracking server
//!
//! Drives the server through the vendor's `ELCApi` module, loaded at runtime.
//! Provides:
//! - Connection, tracking and calibration lifecycle with typed outcomes
//! - Gaze samples and device events delivered to a [`GazeSink`]
//! - A bounded event queue for consuming notifications on your own thread
//! - An in-process server simulator ([`sim`]) for tests and demos
//!
//! ## Quick Start
//! ```no_run
//! use eyelogic::{events, ConnectResult, Event, TrackerClient, TrackingResult};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let (sink, stream) = events::channel(256);
//! let mut client = TrackerClient::from_env();
//! client.init("quick-start", Arc::new(sink)).unwrap();
//!
//! assert_eq!(client.connect().unwrap(), ConnectResult::Success);
//! assert_eq!(client.request_tracking(0).unwrap(), TrackingResult::Success);
//! for _ in 0..100 {
//!     if let Event::GazeSample(sample) = stream.recv_timeout(Duration::from_secs(1)).unwrap() {
//!         println!("#{} por: {:?}", sample.index, sample.por());
//!     }
//! }
//! client.unrequest_tracking();
//! client.disconnect();
//! ```

pub mod error;
pub mod types;
pub mod ffi;
pub mod sentinel;
pub mod sink;
pub mod events;
pub mod dispatch;
pub mod backend;
pub mod native;
pub mod sim;
pub mod config;
pub mod client;

pub use error::EyeLogicError;
pub use types::*;
pub use sentinel::Sentinel;
pub use sink::{GazeSink, NullSink};
pub use events::{Event, EventStream};
pub use backend::Backend;
pub use config::ClientConfig;
pub use client::TrackerClient;

/// Result type alias for eyelogic operations.
pub type Result<T> = std::result::Result<T, EyeLogicError>;
