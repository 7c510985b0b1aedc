use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::native::NativeBackend;
use crate::sentinel::Sentinel;
use crate::sink::GazeSink;
use crate::types::{CalibrateResult, ConnectResult, Lifecycle, SessionStats, TrackingResult};
use crate::{EyeLogicError, Result};
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A session with the EyeLogic server.
///
/// Build it, call [`init`](Self::init) once, then drive the connection and
/// tracking lifecycle. Ordering mistakes (tracking before connecting, and so
/// on) come back as result variants, never as errors or panics. Dropping the
/// client tears the native session down.
///
/// Command methods take `&self`, so the client can be shared with a thread
/// that runs a long `calibrate` while another polls `is_connected`.
pub struct TrackerClient {
    backend: Box<dyn Backend>,
    lifecycle: Lifecycle,
    dispatcher: Option<Arc<Dispatcher>>,
    calibrating: AtomicBool,
}

impl TrackerClient {
    /// Client over any [`Backend`], such as a [`crate::sim::SimClient`].
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            lifecycle: Lifecycle::Uninitialized,
            dispatcher: None,
            calibrating: AtomicBool::new(false),
        }
    }

    /// Client over the vendor library located per `config`.
    pub fn native(config: ClientConfig) -> Self {
        Self::new(NativeBackend::new(config))
    }

    /// Client over the vendor library located per `EYELOGIC_*` variables.
    pub fn from_env() -> Self {
        Self::native(ClientConfig::from_env())
    }

    /// Load the native module and register `sink` for notifications.
    ///
    /// `client_name` is shown in the server's client list. Failing to find or
    /// load the native module is fatal: the error is returned before any
    /// session exists.
    pub fn init(&mut self, client_name: &str, sink: Arc<dyn GazeSink>) -> Result<()> {
        if self.lifecycle != Lifecycle::Uninitialized {
            return Err(EyeLogicError::AlreadyInitialized);
        }
        let name = CString::new(client_name).map_err(|_| EyeLogicError::InvalidClientName)?;

        let sentinel = self.backend.load().inspect_err(|e| {
            log::error!("Cannot load EyeLogic library: {}", e);
        })?;
        let dispatcher = Arc::new(Dispatcher::new(sink, sentinel));
        if let Err(e) = self.backend.init(&name, dispatcher.clone()) {
            self.backend.destroy();
            return Err(e);
        }

        self.dispatcher = Some(dispatcher);
        self.lifecycle = Lifecycle::Initialized;
        log::info!("EyeLogic client {:?} initialized", client_name);
        Ok(())
    }

    /// Connect to the server. Blocks until connected or the native timeout.
    pub fn connect(&self) -> Result<ConnectResult> {
        let Some(dispatcher) = self.session() else {
            return Ok(ConnectResult::NotInited);
        };

        // Notifications may arrive while the native call is still blocking.
        dispatcher.open_gate();
        let code = self.backend.connect();
        let result = decode("connect", code, ConnectResult::from_code(code));

        match result {
            Ok(ConnectResult::Success) | Ok(ConnectResult::AlreadyConnected) => {
                if dispatcher.mark_connected() {
                    log::info!("Connected to EyeLogic server");
                }
            }
            Ok(other) => {
                log::warn!("Connect failed: {:?}", other);
                if !dispatcher.is_connected() {
                    dispatcher.close_gate();
                }
            }
            Err(_) => {
                if !dispatcher.is_connected() {
                    dispatcher.close_gate();
                }
            }
        }
        result
    }

    /// Close the connection. A no-op when not connected.
    ///
    /// No handler runs after this returns. Called from a handler, it returns
    /// without waiting and that handler is the last one to run.
    pub fn disconnect(&self) {
        let Some(dispatcher) = self.session() else {
            return;
        };
        let was_connected = dispatcher.is_connected();
        dispatcher.close_gate();
        self.backend.disconnect();
        if was_connected {
            log::info!("Disconnected from EyeLogic server");
        }
    }

    /// Connected per both the local session and the native layer. Turns
    /// false before `on_connection_closed` runs.
    pub fn is_connected(&self) -> bool {
        self.session()
            .is_some_and(|d| d.is_connected() && self.backend.is_connected())
    }

    /// Ask for the gaze stream at a server-enumerated frame-rate mode.
    ///
    /// On success samples start arriving on the delivery thread.
    pub fn request_tracking(&self, frame_rate_mode: i32) -> Result<TrackingResult> {
        let Some(dispatcher) = self.session() else {
            return Ok(TrackingResult::NotConnected);
        };
        if !dispatcher.is_connected() {
            return Ok(TrackingResult::NotConnected);
        }

        let snapshot = dispatcher.arm_tracking();
        let code = self.backend.request_tracking(frame_rate_mode);
        let result = decode(
            "request_tracking",
            code,
            TrackingResult::from_code(code),
        );

        match result {
            Ok(TrackingResult::Success) => {
                log::info!("Tracking requested at frame-rate mode {}", frame_rate_mode);
            }
            Ok(other) => {
                log::warn!(
                    "Tracking request for mode {} refused: {:?}",
                    frame_rate_mode,
                    other
                );
                dispatcher.restore_tracking(snapshot);
            }
            Err(_) => dispatcher.restore_tracking(snapshot),
        }
        result
    }

    /// Drop this client's interest in the stream. Other clients may keep the
    /// device running. Never fails; a no-op without a connection.
    pub fn unrequest_tracking(&self) {
        let Some(dispatcher) = self.session() else {
            return;
        };
        let was_tracking = dispatcher.is_tracking();
        dispatcher.end_tracking();
        if dispatcher.is_connected() {
            self.backend.unrequest_tracking();
        }
        if was_tracking {
            log::info!("Tracking unrequested");
        }
    }

    /// Run a calibration. Blocks until the operator finishes or aborts it.
    ///
    /// A second call while one is outstanding is refused, not queued.
    pub fn calibrate(&self, calibration_mode: i32) -> Result<CalibrateResult> {
        let Some(dispatcher) = self.session() else {
            return Ok(CalibrateResult::NotConnected);
        };
        if !dispatcher.is_connected() {
            return Ok(CalibrateResult::NotConnected);
        }
        if self
            .calibrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(CalibrateResult::AlreadyCalibrating);
        }

        log::info!("Calibration mode {} started", calibration_mode);
        let code = self.backend.calibrate(calibration_mode);
        self.calibrating.store(false, Ordering::Release);

        let result = decode("calibrate", code, CalibrateResult::from_code(code));
        if let Ok(outcome) = &result {
            log::info!("Calibration finished: {:?}", outcome);
        }
        result
    }

    /// Destroy the native session. Idempotent; also run on drop.
    pub fn teardown(&mut self) {
        if self.lifecycle != Lifecycle::Initialized {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let was_connected = dispatcher.is_connected();
            dispatcher.close_gate();
            if was_connected {
                self.backend.disconnect();
            }
        }
        self.backend.destroy();
        self.lifecycle = Lifecycle::TornDown;
        log::info!("EyeLogic session torn down");
    }

    /// Where the client is between `init` and `teardown`.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Whether samples are currently accepted for this client.
    pub fn is_tracking(&self) -> bool {
        self.session().is_some_and(|d| d.is_tracking())
    }

    /// A `calibrate` call on this client is still blocking.
    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::Acquire)
    }

    /// Sample counters for the session; zero before `init`.
    pub fn stats(&self) -> SessionStats {
        self.dispatcher
            .as_ref()
            .map(|d| d.stats())
            .unwrap_or_default()
    }

    /// The native invalid-value marker, once initialised.
    pub fn sentinel(&self) -> Option<Sentinel> {
        self.session().map(|d| d.sentinel())
    }

    fn session(&self) -> Option<&Arc<Dispatcher>> {
        match self.lifecycle {
            Lifecycle::Initialized => self.dispatcher.as_ref(),
            _ => None,
        }
    }
}

impl Drop for TrackerClient {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn decode<T>(operation: &'static str, code: i32, decoded: Option<T>) -> Result<T> {
    decoded.ok_or_else(|| {
        log::warn!("{} returned undefined code {}", operation, code);
        EyeLogicError::ProtocolViolation { operation, code }
    })
}
