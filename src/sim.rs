//! In-process stand-in for the EyeLogic server.
//!
//! [`SimServer`] models one server with one tracking device shared by any
//! number of [`SimClient`]s, each of which is a [`Backend`]. Notifications are
//! delivered from a dedicated `eyelogic-sim-delivery` thread and samples are
//! produced by an `eyelogic-sim-device` thread, so handlers never run on the
//! caller's thread, as with the native library.
//!
//! ```no_run
//! use eyelogic::sim::{SimConfig, SimServer};
//! use eyelogic::{events, TrackerClient};
//! use std::sync::Arc;
//!
//! let server = SimServer::new(SimConfig::default()).unwrap();
//! let (sink, stream) = events::channel(256);
//! let mut client = TrackerClient::new(server.client());
//! client.init("demo", Arc::new(sink)).unwrap();
//! client.connect().unwrap();
//! client.request_tracking(0).unwrap();
//! println!("{:?}", stream.recv().unwrap());
//! ```

use crate::backend::Backend;
use crate::dispatch::Dispatcher;
use crate::ffi::{ELCGazeSample, ELCPoint2d, ELCPoint3d};
use crate::sentinel::Sentinel;
use crate::types::DeviceIdentity;
use crate::Result;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// Raw codes, as the native library returns them.
const SUCCESS: i32 = 0;
const CONNECT_NOT_INITED: i32 = 1;
const CONNECT_ALREADY_CONNECTED: i32 = 2;
const CONNECT_VERSION_MISMATCH: i32 = 3;
const CONNECT_TIMEOUT: i32 = 4;
const NOT_CONNECTED: i32 = 1;
const TRACKING_DEVICE_MISSING: i32 = 2;
const TRACKING_INVALID_FRAMERATE_MODE: i32 = 3;
const TRACKING_DIFFERENT_FRAMERATE: i32 = 4;
const CALIBRATE_NOT_TRACKING: i32 = 2;
const CALIBRATE_INVALID_MODE: i32 = 3;
const CALIBRATE_ALREADY_CALIBRATING: i32 = 4;
const FAILURE: i32 = 5;

const IDLE_POLL: Duration = Duration::from_millis(2);

/// Behaviour of a simulated server.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Frame rates in Hz; the position is the frame-rate mode index.
    pub frame_rates: Vec<u32>,
    pub calibration_modes: u32,
    pub calibration_duration: Duration,
    pub calibration_succeeds: bool,
    /// How long `connect` blocks before reporting `TIMEOUT`.
    pub connect_timeout: Duration,
    pub sentinel: f64,
    pub server_present: bool,
    pub version_matches: bool,
    pub device_attached: bool,
    pub device: DeviceIdentity,
    /// Every n-th frame carries no measurements. `0` disables blinks.
    pub blink_every: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frame_rates: vec![30, 60, 120],
            calibration_modes: 3,
            calibration_duration: Duration::from_millis(200),
            calibration_succeeds: true,
            connect_timeout: Duration::from_millis(100),
            sentinel: f64::MIN,
            server_present: true,
            version_matches: true,
            device_attached: true,
            device: DeviceIdentity {
                id: 0x454C_0001,
                name: b"EyeLogic LT (simulated)".to_vec(),
                token: b"SIM-0001".to_vec(),
            },
            blink_every: 50,
        }
    }
}

impl SimConfig {
    /// Rates in Hz, indexed by frame-rate mode.
    pub fn with_frame_rates(mut self, rates: Vec<u32>) -> Self {
        self.frame_rates = rates;
        self
    }

    /// Number of calibration modes; valid modes are `0..modes`.
    pub fn with_calibration_modes(mut self, modes: u32) -> Self {
        self.calibration_modes = modes;
        self
    }

    /// How long `calibrate` blocks.
    pub fn with_calibration_duration(mut self, duration: Duration) -> Self {
        self.calibration_duration = duration;
        self
    }

    /// Outcome of a calibration that ran to completion.
    pub fn with_calibration_succeeds(mut self, succeeds: bool) -> Self {
        self.calibration_succeeds = succeeds;
        self
    }

    /// How long `connect` blocks against an absent server.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Invalid value reported at load and used in blink frames.
    pub fn with_sentinel(mut self, sentinel: f64) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Whether the server is reachable at start.
    pub fn with_server_present(mut self, present: bool) -> Self {
        self.server_present = present;
        self
    }

    /// `false` makes every connect report a version mismatch.
    pub fn with_version_matches(mut self, matches: bool) -> Self {
        self.version_matches = matches;
        self
    }

    /// Whether the device is plugged in at start.
    pub fn with_device_attached(mut self, attached: bool) -> Self {
        self.device_attached = attached;
        self
    }

    /// Identity announced through device-connected.
    pub fn with_device(mut self, device: DeviceIdentity) -> Self {
        self.device = device;
        self
    }

    /// Every n-th frame carries no measurements. `0` disables blinks.
    pub fn with_blink_every(mut self, frames: u32) -> Self {
        self.blink_every = frames;
        self
    }

    fn frame_period(&self, mode: i32) -> Option<Duration> {
        let hz = *self.frame_rates.get(usize::try_from(mode).ok()?)?;
        (hz > 0).then(|| Duration::from_secs_f64(1.0 / hz as f64))
    }
}

enum Notice {
    Sample(ELCGazeSample),
    ConnectionClosed,
    DeviceConnected(DeviceIdentity),
    DeviceDisconnected,
    TrackingStopped,
}

enum Delivery {
    Notice(Arc<Dispatcher>, Notice),
    Shutdown,
}

#[derive(Default)]
struct ClientSlot {
    dispatcher: Option<Arc<Dispatcher>>,
    connected: bool,
    tracking_mode: Option<i32>,
}

struct ServerState {
    running: bool,
    present: bool,
    device_attached: bool,
    clients: HashMap<u64, ClientSlot>,
    running_mode: Option<i32>,
    calibrating: bool,
    held_calibration: bool,
    sample_index: i32,
    skip: u32,
    injected: Option<i32>,
}

impl ServerState {
    fn refresh_running_mode(&mut self) {
        if !self.clients.values().any(|c| c.tracking_mode.is_some()) {
            self.running_mode = None;
        }
    }

    fn connected_dispatchers(&self) -> Vec<(Arc<Dispatcher>, bool)> {
        self.clients
            .values()
            .filter(|c| c.connected)
            .filter_map(|c| {
                c.dispatcher
                    .clone()
                    .map(|d| (d, c.tracking_mode.is_some()))
            })
            .collect()
    }
}

struct Inner {
    config: SimConfig,
    epoch: Instant,
    state: Mutex<ServerState>,
    deliveries: Sender<Delivery>,
    next_client: AtomicU64,
    stop: AtomicBool,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, target: Arc<Dispatcher>, notice: Notice) {
        // The delivery thread is gone after shutdown; late notices are dropped.
        let _ = self.deliveries.send(Delivery::Notice(target, notice));
    }
}

/// A simulated EyeLogic server and its device.
pub struct SimServer {
    inner: Arc<Inner>,
    device_thread: Option<JoinHandle<()>>,
    delivery_thread: Option<JoinHandle<()>>,
}

impl SimServer {
    /// Start the server's device and delivery threads.
    pub fn new(config: SimConfig) -> Result<SimServer> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let state = ServerState {
            running: true,
            present: config.server_present,
            device_attached: config.device_attached,
            clients: HashMap::new(),
            running_mode: None,
            calibrating: false,
            held_calibration: false,
            sample_index: 0,
            skip: 0,
            injected: None,
        };
        let inner = Arc::new(Inner {
            config,
            epoch: Instant::now(),
            state: Mutex::new(state),
            deliveries: sender,
            next_client: AtomicU64::new(1),
            stop: AtomicBool::new(false),
        });

        let delivery_thread = std::thread::Builder::new()
            .name("eyelogic-sim-delivery".into())
            .spawn(move || delivery_loop(receiver))?;

        let device_inner = inner.clone();
        let device_thread = std::thread::Builder::new()
            .name("eyelogic-sim-device".into())
            .spawn(move || device_loop(device_inner))?;

        log::info!("Simulated EyeLogic server started");
        Ok(SimServer {
            inner,
            device_thread: Some(device_thread),
            delivery_thread: Some(delivery_thread),
        })
    }

    /// A new client connection point, as another process would have.
    pub fn client(&self) -> SimClient {
        SimClient {
            id: self.inner.next_client.fetch_add(1, Ordering::Relaxed),
            inner: self.inner.clone(),
        }
    }

    /// End every client's connection from the server side.
    pub fn close_connections(&self) {
        let targets: Vec<_> = {
            let mut st = self.inner.state();
            let targets: Vec<_> = st
                .clients
                .values_mut()
                .filter(|c| c.connected)
                .filter_map(|c| {
                    c.connected = false;
                    c.tracking_mode = None;
                    c.dispatcher.clone()
                })
                .collect();
            st.refresh_running_mode();
            targets
        };
        log::info!("Simulated server closing {} connection(s)", targets.len());
        for target in targets {
            self.inner.notify(target, Notice::ConnectionClosed);
        }
    }

    /// Remove the device. Tracking clients also get a tracking-stopped notice.
    pub fn unplug_device(&self) {
        let targets = {
            let mut st = self.inner.state();
            if !st.device_attached {
                return;
            }
            st.device_attached = false;
            let targets = st.connected_dispatchers();
            for slot in st.clients.values_mut() {
                slot.tracking_mode = None;
            }
            st.running_mode = None;
            targets
        };
        log::info!("Simulated device unplugged");
        for (target, tracking) in targets {
            self.inner
                .notify(target.clone(), Notice::DeviceDisconnected);
            if tracking {
                self.inner.notify(target, Notice::TrackingStopped);
            }
        }
    }

    /// Reattach the device and announce it to connected clients.
    pub fn plug_device(&self) {
        let targets = {
            let mut st = self.inner.state();
            if st.device_attached {
                return;
            }
            st.device_attached = true;
            st.connected_dispatchers()
        };
        log::info!("Simulated device plugged in");
        for (target, _) in targets {
            self.inner.notify(
                target,
                Notice::DeviceConnected(self.inner.config.device.clone()),
            );
        }
    }

    /// Stop the device stream for everyone, as the server operator would.
    pub fn stop_tracking(&self) {
        let targets = {
            let mut st = self.inner.state();
            let targets: Vec<_> = st
                .clients
                .values_mut()
                .filter(|c| c.connected && c.tracking_mode.is_some())
                .filter_map(|c| {
                    c.tracking_mode = None;
                    c.dispatcher.clone()
                })
                .collect();
            st.running_mode = None;
            targets
        };
        for target in targets {
            self.inner.notify(target, Notice::TrackingStopped);
        }
    }

    /// Produce the next `frames` frames without delivering them.
    pub fn skip_samples(&self, frames: u32) {
        self.inner.state().skip += frames;
    }

    /// Pretend another client is calibrating.
    pub fn hold_calibration(&self, held: bool) {
        self.inner.state().held_calibration = held;
    }

    /// Make the server reachable or not. Going away closes all connections.
    pub fn set_server_present(&self, present: bool) {
        self.inner.state().present = present;
        if !present {
            self.close_connections();
        }
    }

    /// Reply to the next blocking call with `code`, whatever it is.
    pub fn inject_reply(&self, code: i32) {
        self.inner.state().injected = Some(code);
    }

    /// Clients currently holding a tracking request.
    pub fn tracker_count(&self) -> usize {
        self.inner
            .state()
            .clients
            .values()
            .filter(|c| c.tracking_mode.is_some())
            .count()
    }

    /// Frame-rate mode the device runs at, if anyone is tracking.
    pub fn running_mode(&self) -> Option<i32> {
        self.inner.state().running_mode
    }

    /// A calibration is running on the server.
    pub fn is_calibrating(&self) -> bool {
        self.inner.state().calibrating
    }

    /// Close all connections and stop the server threads.
    pub fn shutdown(&mut self) {
        if self.device_thread.is_none() && self.delivery_thread.is_none() {
            return;
        }
        self.close_connections();
        self.inner.state().running = false;
        self.inner.stop.store(true, Ordering::Release);
        if let Some(thread) = self.device_thread.take() {
            let _ = thread.join();
        }
        let _ = self.inner.deliveries.send(Delivery::Shutdown);
        if let Some(thread) = self.delivery_thread.take() {
            let _ = thread.join();
        }
        log::info!("Simulated EyeLogic server stopped");
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One client's view of a [`SimServer`].
pub struct SimClient {
    id: u64,
    inner: Arc<Inner>,
}

impl SimClient {
    fn release_tracking(st: &mut ServerState, id: u64) {
        if let Some(slot) = st.clients.get_mut(&id) {
            slot.tracking_mode = None;
        }
        st.refresh_running_mode();
    }
}

impl Backend for SimClient {
    fn load(&mut self) -> Result<Sentinel> {
        Ok(Sentinel::new(self.inner.config.sentinel))
    }

    fn init(&mut self, client_name: &CStr, dispatcher: Arc<Dispatcher>) -> Result<()> {
        log::debug!(
            "Simulated client {} registered as {:?}",
            self.id,
            client_name.to_string_lossy()
        );
        self.inner.state().clients.insert(
            self.id,
            ClientSlot {
                dispatcher: Some(dispatcher),
                ..ClientSlot::default()
            },
        );
        Ok(())
    }

    fn destroy(&mut self) {
        let mut st = self.inner.state();
        st.clients.remove(&self.id);
        st.refresh_running_mode();
    }

    fn connect(&self) -> i32 {
        let mut st = self.inner.state();
        if let Some(code) = st.injected.take() {
            return code;
        }
        if !st.clients.contains_key(&self.id) {
            return CONNECT_NOT_INITED;
        }
        if !st.running || !st.present {
            drop(st);
            std::thread::sleep(self.inner.config.connect_timeout);
            return CONNECT_TIMEOUT;
        }
        if !self.inner.config.version_matches {
            return CONNECT_VERSION_MISMATCH;
        }
        let device_attached = st.device_attached;
        let Some(slot) = st.clients.get_mut(&self.id) else {
            return CONNECT_NOT_INITED;
        };
        if slot.connected {
            return CONNECT_ALREADY_CONNECTED;
        }
        slot.connected = true;
        let dispatcher = slot.dispatcher.clone();
        drop(st);

        if let (true, Some(target)) = (device_attached, dispatcher) {
            self.inner.notify(
                target,
                Notice::DeviceConnected(self.inner.config.device.clone()),
            );
        }
        SUCCESS
    }

    fn disconnect(&self) {
        let mut st = self.inner.state();
        if let Some(slot) = st.clients.get_mut(&self.id) {
            slot.connected = false;
        }
        Self::release_tracking(&mut st, self.id);
    }

    fn is_connected(&self) -> bool {
        self.inner
            .state()
            .clients
            .get(&self.id)
            .is_some_and(|c| c.connected)
    }

    fn request_tracking(&self, frame_rate_mode: i32) -> i32 {
        let mut st = self.inner.state();
        if let Some(code) = st.injected.take() {
            return code;
        }
        if !st.clients.get(&self.id).is_some_and(|c| c.connected) {
            return NOT_CONNECTED;
        }
        if !st.device_attached {
            return TRACKING_DEVICE_MISSING;
        }
        if self.inner.config.frame_period(frame_rate_mode).is_none() {
            return TRACKING_INVALID_FRAMERATE_MODE;
        }
        if let Some(running) = st.running_mode {
            let others = st
                .clients
                .iter()
                .any(|(id, c)| *id != self.id && c.tracking_mode.is_some());
            if running != frame_rate_mode && others {
                return TRACKING_DIFFERENT_FRAMERATE;
            }
        }
        if let Some(slot) = st.clients.get_mut(&self.id) {
            slot.tracking_mode = Some(frame_rate_mode);
        }
        st.running_mode = Some(frame_rate_mode);
        log::debug!(
            "Simulated client {} tracking at mode {}",
            self.id,
            frame_rate_mode
        );
        SUCCESS
    }

    fn unrequest_tracking(&self) {
        Self::release_tracking(&mut self.inner.state(), self.id);
    }

    fn calibrate(&self, calibration_mode: i32) -> i32 {
        {
            let mut st = self.inner.state();
            if let Some(code) = st.injected.take() {
                return code;
            }
            let Some(slot) = st.clients.get(&self.id).filter(|c| c.connected) else {
                return NOT_CONNECTED;
            };
            if slot.tracking_mode.is_none() || !st.device_attached {
                return CALIBRATE_NOT_TRACKING;
            }
            if calibration_mode < 0 || calibration_mode as u32 >= self.inner.config.calibration_modes
            {
                return CALIBRATE_INVALID_MODE;
            }
            if st.calibrating || st.held_calibration {
                return CALIBRATE_ALREADY_CALIBRATING;
            }
            st.calibrating = true;
        }

        log::debug!("Simulated calibration {} running", calibration_mode);
        std::thread::sleep(self.inner.config.calibration_duration);

        let mut st = self.inner.state();
        st.calibrating = false;
        let still_tracking = st
            .clients
            .get(&self.id)
            .is_some_and(|c| c.connected && c.tracking_mode.is_some());
        if still_tracking && self.inner.config.calibration_succeeds {
            SUCCESS
        } else {
            FAILURE
        }
    }
}

fn delivery_loop(receiver: Receiver<Delivery>) {
    log::debug!("Simulated delivery thread started");
    for delivery in receiver.iter() {
        let (target, notice) = match delivery {
            Delivery::Notice(target, notice) => (target, notice),
            Delivery::Shutdown => break,
        };
        match notice {
            Notice::Sample(raw) => target.gaze_sample(&raw),
            Notice::ConnectionClosed => target.connection_closed(),
            Notice::DeviceConnected(device) => {
                target.device_connected(device.id, &device.name, &device.token)
            }
            Notice::DeviceDisconnected => target.device_disconnected(),
            Notice::TrackingStopped => target.tracking_stopped(),
        }
    }
    log::debug!("Simulated delivery thread stopping");
}

/// Produces frames at the running mode's rate while anyone is tracking.
fn device_loop(inner: Arc<Inner>) {
    while !inner.stop.load(Ordering::Acquire) {
        let period = {
            let st = inner.state();
            st.running_mode
                .and_then(|mode| inner.config.frame_period(mode))
        };
        let Some(period) = period else {
            std::thread::sleep(IDLE_POLL);
            continue;
        };
        std::thread::sleep(period);

        let (raw, targets) = {
            let mut st = inner.state();
            if st.running_mode.is_none() {
                continue;
            }
            st.sample_index = st.sample_index.wrapping_add(1);
            if st.skip > 0 {
                st.skip -= 1;
                continue;
            }
            let timestamp = inner.epoch.elapsed().as_micros() as i64;
            let raw = synth_sample(&inner.config, timestamp, st.sample_index);
            let targets: Vec<_> = st
                .clients
                .values()
                .filter(|c| c.connected && c.tracking_mode.is_some())
                .filter_map(|c| c.dispatcher.clone())
                .collect();
            (raw, targets)
        };
        for target in targets {
            inner.notify(target, Notice::Sample(raw));
        }
    }
}

/// Gaze circling the centre of a 1920x1080 screen, with periodic blinks.
fn synth_sample(config: &SimConfig, timestamp_micros: i64, index: i32) -> ELCGazeSample {
    if config.blink_every > 0 && index as u32 % config.blink_every == 0 {
        return ELCGazeSample::invalid(config.sentinel, timestamp_micros, index);
    }

    let t = timestamp_micros as f64 / 1e6;
    let centre = ELCPoint2d {
        x: 960.0 + 200.0 * t.cos(),
        y: 540.0 + 200.0 * t.sin(),
    };
    let jitter = (index as f64 * 12.9898).sin() * 4.0;
    let offset = |dx: f64| ELCPoint2d {
        x: centre.x + dx,
        y: centre.y,
    };

    ELCGazeSample {
        timestampMicroSec: timestamp_micros,
        index,
        porRaw: ELCPoint2d {
            x: centre.x + jitter,
            y: centre.y - jitter,
        },
        porFiltered: centre,
        porLeft: offset(-15.0),
        eyePositionLeft: ELCPoint3d {
            x: -32.0,
            y: 0.0,
            z: 600.0,
        },
        pupilRadiusLeft: 1.8,
        porRight: offset(15.0),
        eyePositionRight: ELCPoint3d {
            x: 32.0,
            y: 0.0,
            z: 600.0,
        },
        pupilRadiusRight: 1.85,
    }
}
