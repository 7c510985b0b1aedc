//! Delivery of native notifications to a [`GazeSink`].
//!
//! The dispatcher is the only place that interprets callbacks. It owns the
//! session flags the client queries, enforces the ordering contract of the
//! sample stream and isolates the native delivery thread from sink panics.

use crate::ffi::ELCGazeSample;
use crate::sentinel::Sentinel;
use crate::sink::GazeSink;
use crate::types::{Channels, DeviceIdentity, SessionStats};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

const NO_INDEX: i64 = i64::MIN;

thread_local! {
    /// Address of the dispatcher whose handler is running on this thread.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// True while any dispatcher's handler runs on the calling thread.
pub(crate) fn delivering() -> bool {
    DELIVERING.with(|d| d.get()) != 0
}

/// Held for the duration of one notification.
struct Delivery<'a> {
    _in_flight: RwLockReadGuard<'a, ()>,
    previous: usize,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(self.previous));
    }
}

#[derive(Debug, Default)]
struct Link {
    /// Handlers may run.
    open: bool,
    connected: bool,
}

/// Saved tracking flags, restored when a tracking request is refused.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrackingSnapshot {
    tracking: bool,
    stream_active: bool,
}

/// Routes native notifications for one session to its sink.
///
/// Backends call the `pub` methods from their delivery thread. Each call
/// holds a read guard on the in-flight lock for the duration of the handler,
/// which is what lets [`Dispatcher::close_gate`] wait for running handlers.
pub struct Dispatcher {
    sink: Arc<dyn GazeSink>,
    channels: Channels,
    sentinel: Sentinel,
    link: Mutex<Link>,
    in_flight: RwLock<()>,
    /// Samples are accepted.
    tracking: AtomicBool,
    /// A stream exists that has not been ended locally or by a stop notice.
    stream_active: AtomicBool,
    /// A locally ended stream may still send its stop notice. Cleared by the
    /// notice itself or by the first sample of the next stream.
    stale_stop: AtomicBool,
    last_index: AtomicI64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(sink: Arc<dyn GazeSink>, sentinel: Sentinel) -> Self {
        let channels = sink.channels();
        Self {
            sink,
            channels,
            sentinel,
            link: Mutex::new(Link::default()),
            in_flight: RwLock::new(()),
            tracking: AtomicBool::new(false),
            stream_active: AtomicBool::new(false),
            stale_stop: AtomicBool::new(false),
            last_index: AtomicI64::new(NO_INDEX),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn sentinel(&self) -> Sentinel {
        self.sentinel
    }

    /// Deliver one native sample.
    pub fn gaze_sample(&self, raw: &ELCGazeSample) {
        let _guard = self.enter();
        if !self.is_open() || !self.tracking.load(Ordering::Acquire) {
            return;
        }

        let index = raw.index as i64;
        let previous = self
            .last_index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (last == NO_INDEX || index > last).then_some(index)
            });
        match previous {
            Err(last) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                log::warn!("Discarding sample {} (last delivered {})", index, last);
                return;
            }
            Ok(last) if last != NO_INDEX && index - last > 1 => {
                let gap = (index - last - 1) as u64;
                self.dropped.fetch_add(gap, Ordering::Relaxed);
                log::debug!("{} sample(s) dropped before index {}", gap, index);
            }
            Ok(_) => {}
        }

        self.stale_stop.store(false, Ordering::Release);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        if self.channels.contains(Channels::GAZE_SAMPLE) {
            let sample = self.sentinel.sample(raw);
            self.invoke("on_gaze_sample", |sink| sink.on_gaze_sample(&sample));
        }
    }

    /// The server closed the connection. Delivered at most once per connection.
    pub fn connection_closed(&self) {
        let _guard = self.enter();
        {
            let mut link = self.link();
            if !link.open {
                return;
            }
            link.open = false;
            link.connected = false;
        }
        self.tracking.store(false, Ordering::Release);
        self.stream_active.store(false, Ordering::Release);
        self.stale_stop.store(false, Ordering::Release);
        log::info!("Connection closed by server");

        if self.channels.contains(Channels::CONNECTION_CLOSED) {
            self.invoke("on_connection_closed", |sink| sink.on_connection_closed());
        }
    }

    /// Tracking hardware became available. The buffers are copied.
    pub fn device_connected(&self, device_id: i64, name: &[u8], token: &[u8]) {
        let _guard = self.enter();
        if !self.is_open() {
            return;
        }
        let device = DeviceIdentity {
            id: device_id,
            name: name.to_vec(),
            token: token.to_vec(),
        };
        log::info!(
            "Device connected: id={} name={}",
            device.id,
            device.name_lossy()
        );

        if self.channels.contains(Channels::DEVICE_CONNECTED) {
            self.invoke("on_device_connected", |sink| {
                sink.on_device_connected(&device)
            });
        }
    }

    pub fn device_disconnected(&self) {
        let _guard = self.enter();
        if !self.is_open() {
            return;
        }
        self.tracking.store(false, Ordering::Release);
        log::info!("Device disconnected");

        if self.channels.contains(Channels::DEVICE_DISCONNECTED) {
            self.invoke("on_device_disconnected", |sink| {
                sink.on_device_disconnected()
            });
        }
    }

    /// The stream ended. Suppressed when the client already unrequested it,
    /// including a late notice for a stream replaced by a new request.
    pub fn tracking_stopped(&self) {
        let _guard = self.enter();
        if !self.is_open() {
            return;
        }
        if self.stale_stop.swap(false, Ordering::AcqRel) {
            log::debug!("Tracking-stopped for a locally ended stream, not forwarded");
            return;
        }
        self.tracking.store(false, Ordering::Release);
        if !self.stream_active.swap(false, Ordering::AcqRel) {
            log::debug!("Tracking-stopped after local unrequest, not forwarded");
            return;
        }
        log::info!("Tracking stopped by server");

        if self.channels.contains(Channels::TRACKING_STOPPED) {
            self.invoke("on_tracking_stopped", |sink| sink.on_tracking_stopped());
        }
    }

    pub(crate) fn open_gate(&self) {
        self.link().open = true;
    }

    /// Stop handler invocation and wait for handlers already running.
    ///
    /// Called from one of this dispatcher's own handlers, the wait is skipped:
    /// that handler is the one in flight, and nothing else runs on the
    /// delivery thread until it returns.
    pub(crate) fn close_gate(&self) {
        {
            let mut link = self.link();
            link.open = false;
            link.connected = false;
        }
        self.tracking.store(false, Ordering::Release);
        self.stream_active.store(false, Ordering::Release);
        self.stale_stop.store(false, Ordering::Release);
        if self.in_handler() {
            log::debug!("Delivery gate closed from a handler");
            return;
        }
        drop(self.in_flight.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// True on the thread running one of this dispatcher's handlers.
    fn in_handler(&self) -> bool {
        DELIVERING.with(|d| d.get()) == self.address()
    }

    /// Record a successful connect unless the server already closed it again.
    pub(crate) fn mark_connected(&self) -> bool {
        let mut link = self.link();
        if link.open {
            link.connected = true;
        }
        link.connected
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link().connected
    }

    /// Accept samples ahead of a tracking request so frames delivered while
    /// the request is still blocking are not lost.
    pub(crate) fn arm_tracking(&self) -> TrackingSnapshot {
        let snapshot = TrackingSnapshot {
            tracking: self.tracking.swap(true, Ordering::AcqRel),
            stream_active: self.stream_active.swap(true, Ordering::AcqRel),
        };
        if !snapshot.tracking {
            self.last_index.store(NO_INDEX, Ordering::Release);
        }
        snapshot
    }

    /// Undo [`Dispatcher::arm_tracking`]. Nothing is restored once the
    /// connection is gone.
    pub(crate) fn restore_tracking(&self, snapshot: TrackingSnapshot) {
        let link = self.link();
        if !link.connected {
            return;
        }
        self.tracking.store(snapshot.tracking, Ordering::Release);
        self.stream_active
            .store(snapshot.stream_active, Ordering::Release);
    }

    pub(crate) fn end_tracking(&self) {
        self.tracking.store(false, Ordering::Release);
        if self.stream_active.swap(false, Ordering::AcqRel) {
            self.stale_stop.store(true, Ordering::Release);
        }
    }

    pub(crate) fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            samples_delivered: self.delivered.load(Ordering::Relaxed),
            samples_dropped: self.dropped.load(Ordering::Relaxed),
            samples_discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    fn enter(&self) -> Delivery<'_> {
        let in_flight = self.in_flight.read().unwrap_or_else(PoisonError::into_inner);
        let previous = DELIVERING.with(|d| d.replace(self.address()));
        Delivery {
            _in_flight: in_flight,
            previous,
        }
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_open(&self) -> bool {
        self.link().open
    }

    fn invoke(&self, handler: &'static str, f: impl FnOnce(&dyn GazeSink)) {
        let sink = self.sink.as_ref();
        if catch_unwind(AssertUnwindSafe(|| f(sink))).is_err() {
            log::error!("GazeSink::{} panicked; event dropped", handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GazeSample;

    const INVALID: f64 = -1.0e300;

    #[derive(Default)]
    struct Recorder {
        indices: Mutex<Vec<i32>>,
        closed: AtomicU64,
        stopped: AtomicU64,
        devices: Mutex<Vec<DeviceIdentity>>,
    }

    impl GazeSink for Recorder {
        fn on_gaze_sample(&self, sample: &GazeSample) {
            self.indices.lock().unwrap().push(sample.index);
        }
        fn on_connection_closed(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_device_connected(&self, device: &DeviceIdentity) {
            self.devices.lock().unwrap().push(device.clone());
        }
        fn on_tracking_stopped(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connected_dispatcher() -> (Arc<Recorder>, Dispatcher) {
        let rec = Arc::new(Recorder::default());
        let d = Dispatcher::new(rec.clone(), Sentinel::new(INVALID));
        d.open_gate();
        assert!(d.mark_connected());
        (rec, d)
    }

    fn raw(index: i32) -> ELCGazeSample {
        ELCGazeSample::invalid(INVALID, index as i64 * 1000, index)
    }

    #[test]
    fn test_samples_need_tracking() {
        let (rec, d) = connected_dispatcher();
        d.gaze_sample(&raw(1));
        assert!(rec.indices.lock().unwrap().is_empty());

        d.arm_tracking();
        d.gaze_sample(&raw(1));
        assert_eq!(*rec.indices.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_index_gaps_and_repeats() {
        let (rec, d) = connected_dispatcher();
        d.arm_tracking();
        for i in [1, 2, 5, 5, 4, 6] {
            d.gaze_sample(&raw(i));
        }
        assert_eq!(*rec.indices.lock().unwrap(), vec![1, 2, 5, 6]);
        let stats = d.stats();
        assert_eq!(stats.samples_delivered, 4);
        assert_eq!(stats.samples_dropped, 2);
        assert_eq!(stats.samples_discarded, 2);
    }

    #[test]
    fn test_new_request_resets_index() {
        let (rec, d) = connected_dispatcher();
        d.arm_tracking();
        d.gaze_sample(&raw(10));
        d.end_tracking();
        d.arm_tracking();
        d.gaze_sample(&raw(3));
        assert_eq!(*rec.indices.lock().unwrap(), vec![10, 3]);
    }

    #[test]
    fn test_connection_closed_once() {
        let (rec, d) = connected_dispatcher();
        d.arm_tracking();
        d.connection_closed();
        d.connection_closed();
        assert_eq!(rec.closed.load(Ordering::SeqCst), 1);
        assert!(!d.is_connected());
        assert!(!d.is_tracking());

        d.gaze_sample(&raw(1));
        assert!(rec.indices.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tracking_stopped_after_unrequest_is_suppressed() {
        let (rec, d) = connected_dispatcher();
        d.arm_tracking();
        d.end_tracking();
        d.tracking_stopped();
        assert_eq!(rec.stopped.load(Ordering::SeqCst), 0);

        d.arm_tracking();
        d.device_disconnected();
        assert!(!d.is_tracking());
        d.tracking_stopped();
        assert_eq!(rec.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_gate_blocks_everything() {
        let (rec, d) = connected_dispatcher();
        d.close_gate();
        d.device_connected(1, b"LT", b"tok");
        d.connection_closed();
        assert!(rec.devices.lock().unwrap().is_empty());
        assert_eq!(rec.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restore_on_refusal() {
        let (_rec, d) = connected_dispatcher();
        let snapshot = d.arm_tracking();
        d.restore_tracking(snapshot);
        assert!(!d.is_tracking());
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        struct Panics;
        impl GazeSink for Panics {
            fn on_device_connected(&self, _device: &DeviceIdentity) {
                panic!("boom");
            }
        }
        let d = Dispatcher::new(Arc::new(Panics), Sentinel::new(INVALID));
        d.open_gate();
        d.device_connected(9, b"", b"");
        // Gate still usable after the panic.
        d.close_gate();
    }

    #[test]
    fn test_mark_connected_after_close_is_refused() {
        let (_rec, d) = connected_dispatcher();
        d.connection_closed();
        assert!(!d.mark_connected());
    }

    #[test]
    fn test_late_stop_for_replaced_stream_is_ignored() {
        let (rec, d) = connected_dispatcher();
        d.arm_tracking();
        d.gaze_sample(&raw(1));
        d.end_tracking();
        d.arm_tracking();

        // Stop notice of the unrequested stream, arriving after the re-request.
        d.tracking_stopped();
        assert!(d.is_tracking());
        d.gaze_sample(&raw(7));
        assert_eq!(*rec.indices.lock().unwrap(), vec![1, 7]);
        assert_eq!(rec.stopped.load(Ordering::SeqCst), 0);

        d.tracking_stopped();
        assert!(!d.is_tracking());
        assert_eq!(rec.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restore_after_close_keeps_tracking_off() {
        let (_rec, d) = connected_dispatcher();
        d.arm_tracking();
        let snapshot = d.arm_tracking();
        d.connection_closed();
        d.restore_tracking(snapshot);
        assert!(!d.is_tracking());
    }

    #[test]
    fn test_close_gate_from_own_handler_returns() {
        #[derive(Default)]
        struct ClosesGate {
            dispatcher: std::sync::OnceLock<std::sync::Weak<Dispatcher>>,
            calls: AtomicU64,
        }
        impl GazeSink for ClosesGate {
            fn on_device_connected(&self, _device: &DeviceIdentity) {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(d) = self.dispatcher.get().and_then(|w| w.upgrade()) {
                    d.close_gate();
                }
            }
        }

        let sink = Arc::new(ClosesGate::default());
        let d = Arc::new(Dispatcher::new(sink.clone(), Sentinel::new(INVALID)));
        sink.dispatcher.set(Arc::downgrade(&d)).unwrap();
        d.open_gate();
        d.mark_connected();

        d.device_connected(1, b"LT", b"tok");
        d.device_connected(2, b"LT", b"tok");
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert!(!d.is_connected());
        assert!(!delivering());
        // Outside a handler the gate still waits and returns.
        d.close_gate();
    }

    proptest::proptest! {
        #[test]
        fn prop_delivered_indices_strictly_increase(
            indices in proptest::collection::vec(-50i32..500, 0..200)
        ) {
            let (rec, d) = connected_dispatcher();
            d.arm_tracking();
            for i in &indices {
                d.gaze_sample(&raw(*i));
            }

            let seen = rec.indices.lock().unwrap().clone();
            proptest::prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
            let stats = d.stats();
            proptest::prop_assert_eq!(stats.samples_delivered as usize, seen.len());
            proptest::prop_assert_eq!(
                stats.samples_delivered + stats.samples_discarded,
                indices.len() as u64
            );
        }
    }
}
