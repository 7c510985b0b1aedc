use crate::dispatch::Dispatcher;
use crate::sentinel::Sentinel;
use crate::Result;
use std::ffi::CStr;
use std::sync::Arc;

/// The native side of a session.
///
/// Mirrors the native entry points one to one and returns raw integer codes;
/// decoding and the ordering rules live in [`crate::TrackerClient`].
/// Implemented by [`crate::native::NativeBackend`] (the vendor library) and
/// [`crate::sim::SimClient`] (an in-process server).
pub trait Backend: Send + Sync {
    /// Locate and load the native module, returning its invalid-value marker.
    fn load(&mut self) -> Result<Sentinel>;

    /// Register the session's callbacks. Notifications for this session must
    /// go through `dispatcher` from a thread other than the caller's.
    fn init(&mut self, client_name: &CStr, dispatcher: Arc<Dispatcher>) -> Result<()>;

    /// Release whatever `load` and `init` acquired. Also called after a
    /// failed `init`; a second call does nothing.
    fn destroy(&mut self);

    /// Blocking. Returns a connect code.
    fn connect(&self) -> i32;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Blocking. Returns a request-tracking code.
    fn request_tracking(&self, frame_rate_mode: i32) -> i32;

    fn unrequest_tracking(&self);

    /// Blocking, possibly for seconds. Returns a calibrate code.
    fn calibrate(&self, calibration_mode: i32) -> i32;
}
