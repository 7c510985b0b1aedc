//! Native declarations for the EyeLogic client library (`ELCApi`).
//!
//! Layouts and signatures mirror the vendor's C header. Nothing in here is
//! safe to use directly; [`crate::native`] wraps it.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_int};

/// Exported `double` marking a missing measurement.
pub const SYM_INVALID_VALUE: &[u8] = b"ELInvalidValue\0";
pub const SYM_INIT_API: &[u8] = b"elInitApi\0";
pub const SYM_DESTROY_API: &[u8] = b"elDestroyApi\0";
pub const SYM_CONNECT: &[u8] = b"elConnect\0";
pub const SYM_DISCONNECT: &[u8] = b"elDisconnect\0";
pub const SYM_IS_CONNECTED: &[u8] = b"elIsConnected\0";
pub const SYM_REQUEST_TRACKING: &[u8] = b"elRequestTracking\0";
pub const SYM_UNREQUEST_TRACKING: &[u8] = b"elUnrequestTracking\0";
pub const SYM_CALIBRATE: &[u8] = b"elCalibrate\0";

/// Base name of the native module for this pointer width.
#[cfg(target_pointer_width = "64")]
pub const LIBRARY_BASE_NAME: &str = "ELCApi";
#[cfg(not(target_pointer_width = "64"))]
pub const LIBRARY_BASE_NAME: &str = "ELCApi32";

/// 2D vector; a component equal to `ELInvalidValue` means no measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ELCPoint2d {
    pub x: f64,
    pub y: f64,
}

/// 3D vector; a component equal to `ELInvalidValue` means no measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ELCPoint3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One gaze frame as laid out by the native library.
///
/// Field order is the native one: left-eye fields sit between `porLeft` and
/// `porRight`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ELCGazeSample {
    pub timestampMicroSec: i64,
    pub index: i32,
    pub porRaw: ELCPoint2d,
    pub porFiltered: ELCPoint2d,
    pub porLeft: ELCPoint2d,
    pub eyePositionLeft: ELCPoint3d,
    pub pupilRadiusLeft: f64,
    pub porRight: ELCPoint2d,
    pub eyePositionRight: ELCPoint3d,
    pub pupilRadiusRight: f64,
}

// Callbacks are plain cdecl function pointers; a null pointer disables the slot.
pub type SampleCallback = Option<unsafe extern "C" fn(sample: *const ELCGazeSample)>;
pub type ConnectionClosedCallback = Option<unsafe extern "C" fn()>;
pub type DeviceConnectedCallback = Option<
    unsafe extern "C" fn(
        device_id: i64,
        name: *const u8,
        name_len: i32,
        token: *const u8,
        token_len: i32,
    ),
>;
pub type DeviceDisconnectedCallback = Option<unsafe extern "C" fn()>;
pub type TrackingStoppedCallback = Option<unsafe extern "C" fn()>;

// Entry points use the platform API convention (stdcall on 32-bit Windows).
pub type InitApiFn = unsafe extern "system" fn(
    client_name: *const c_char,
    sample: SampleCallback,
    connection_closed: ConnectionClosedCallback,
    device_connected: DeviceConnectedCallback,
    device_disconnected: DeviceDisconnectedCallback,
    tracking_stopped: TrackingStoppedCallback,
) -> c_int;
pub type DestroyApiFn = unsafe extern "system" fn();
pub type ConnectFn = unsafe extern "system" fn() -> c_int;
pub type DisconnectFn = unsafe extern "system" fn();
pub type IsConnectedFn = unsafe extern "system" fn() -> bool;
pub type RequestTrackingFn = unsafe extern "system" fn(frame_rate_mode: c_int) -> c_int;
pub type UnrequestTrackingFn = unsafe extern "system" fn();
pub type CalibrateFn = unsafe extern "system" fn(calibration_mode: c_int) -> c_int;

impl ELCGazeSample {
    /// A sample where every measurement carries `invalid`.
    pub fn invalid(invalid: f64, timestamp_micros: i64, index: i32) -> Self {
        let p2 = ELCPoint2d { x: invalid, y: invalid };
        let p3 = ELCPoint3d {
            x: invalid,
            y: invalid,
            z: invalid,
        };
        Self {
            timestampMicroSec: timestamp_micros,
            index,
            porRaw: p2,
            porFiltered: p2,
            porLeft: p2,
            eyePositionLeft: p3,
            pupilRadiusLeft: invalid,
            porRight: p2,
            eyePositionRight: p3,
            pupilRadiusRight: invalid,
        }
    }
}

/// View a native `(pointer, length)` buffer.
///
/// A null pointer or a non-positive length yields an empty slice.
///
/// # Safety
/// When non-null, `ptr` must be valid for reads of `len` bytes for `'a`.
pub unsafe fn buffer_slice<'a>(ptr: *const u8, len: i32) -> &'a [u8] {
    if ptr.is_null() || len <= 0 {
        return &[];
    }
    std::slice::from_raw_parts(ptr, len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_sample_layout_matches_native() {
        assert_eq!(size_of::<ELCPoint2d>(), 16);
        assert_eq!(size_of::<ELCPoint3d>(), 24);
        assert_eq!(offset_of!(ELCGazeSample, index), 8);
        assert_eq!(offset_of!(ELCGazeSample, porRaw), 16);
        assert_eq!(offset_of!(ELCGazeSample, eyePositionLeft), 64);
        assert_eq!(offset_of!(ELCGazeSample, pupilRadiusLeft), 88);
        assert_eq!(offset_of!(ELCGazeSample, porRight), 96);
        assert_eq!(offset_of!(ELCGazeSample, pupilRadiusRight), 136);
        assert_eq!(size_of::<ELCGazeSample>(), 144);
    }

    #[test]
    fn test_buffer_slice() {
        let data = b"ELG-0042";
        let view = unsafe { buffer_slice(data.as_ptr(), data.len() as i32) };
        assert_eq!(view, &data[..]);
        assert!(unsafe { buffer_slice(std::ptr::null(), 8) }.is_empty());
        assert!(unsafe { buffer_slice(data.as_ptr(), -1) }.is_empty());
    }

    #[test]
    fn test_library_base_name() {
        assert!(LIBRARY_BASE_NAME.starts_with("ELCApi"));
    }
}
