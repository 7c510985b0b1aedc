use crate::types::{Channels, DeviceIdentity, GazeSample};

/// Receiver for the five asynchronous notifications of a session.
///
/// Every method defaults to a no-op, so a sink implements only what it needs.
///
/// Handlers run on the delivery thread owned by the native layer, never on the
/// thread that called `connect`, `request_tracking` or `calibrate`. They must
/// return quickly. A handler may call the non-blocking operations of its own
/// client (`is_connected`, `unrequest_tracking`, `disconnect`) but not the
/// blocking ones, which would stall delivery for the whole process. Use
/// [`crate::events::channel`] to hand events to another thread instead.
pub trait GazeSink: Send + Sync {
    /// One frame, while this client holds a tracking request.
    fn on_gaze_sample(&self, _sample: &GazeSample) {}

    /// The server ended the session. Nothing is delivered afterward.
    fn on_connection_closed(&self) {}

    fn on_device_connected(&self, _device: &DeviceIdentity) {}

    /// Hardware removed; tracking stops implicitly.
    fn on_device_disconnected(&self) {}

    /// The stream ended for a reason other than `unrequest_tracking`.
    fn on_tracking_stopped(&self) {}

    /// Channels this sink wants. The adapter still observes the others to
    /// keep its own state current.
    fn channels(&self) -> Channels {
        Channels::all()
    }
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl GazeSink for NullSink {
    fn channels(&self) -> Channels {
        Channels::empty()
    }
}
