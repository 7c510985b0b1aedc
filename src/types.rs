/// 2D gaze coordinate in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

/// 3D eye position in millimetres, device coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One tracking frame with missing measurements already mapped to `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeSample {
    /// Server clock in microseconds; epoch is defined by the server.
    pub timestamp_micros: i64,
    /// Monotonic frame counter. Gaps mean dropped frames.
    pub index: i32,
    /// Binocular point of regard, unfiltered.
    pub por_raw: Option<Point2D>,
    /// Binocular point of regard after the server's filter.
    pub por_filtered: Option<Point2D>,
    pub por_left: Option<Point2D>,
    pub por_right: Option<Point2D>,
    pub eye_position_left: Option<Point3D>,
    pub eye_position_right: Option<Point3D>,
    pub pupil_radius_left: Option<f64>,
    pub pupil_radius_right: Option<f64>,
}

impl GazeSample {
    /// Best available binocular gaze point: filtered, else raw.
    pub fn por(&self) -> Option<Point2D> {
        self.por_filtered.or(self.por_raw)
    }

    /// Both eyes produced a point of regard in this frame.
    pub fn is_binocular(&self) -> bool {
        self.por_left.is_some() && self.por_right.is_some()
    }
}

/// Identity of a tracking device announced by the server.
///
/// The native buffers only live for the callback; these are owned copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: i64,
    pub name: Vec<u8>,
    pub token: Vec<u8>,
}

impl DeviceIdentity {
    pub fn name_lossy(&self) -> String {
        lossy_trimmed(&self.name)
    }

    pub fn token_lossy(&self) -> String {
        lossy_trimmed(&self.token)
    }
}

fn lossy_trimmed(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

/// Outcome of [`crate::TrackerClient::connect`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectResult {
    Success = 0,
    /// `init` has not been called.
    NotInited = 1,
    /// A connection already exists and stays usable.
    AlreadyConnected = 2,
    /// Client API is newer than the server; update the server.
    VersionMismatch = 3,
    /// Server not found or not responding.
    Timeout = 4,
}

impl ConnectResult {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::NotInited,
            2 => Self::AlreadyConnected,
            3 => Self::VersionMismatch,
            4 => Self::Timeout,
            _ => return None,
        })
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Whether a later retry of `connect` can succeed without changing the client.
    pub fn retryable(self) -> bool {
        matches!(self, Self::NotInited | Self::Timeout)
    }
}

/// Outcome of [`crate::TrackerClient::request_tracking`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingResult {
    Success = 0,
    NotConnected = 1,
    /// No tracking hardware attached.
    DeviceMissing = 2,
    /// Frame-rate mode index not offered by the device.
    InvalidFramerateMode = 3,
    /// Another client holds tracking at a different frame rate.
    AlreadyRunningDifferentFramerate = 4,
    Failure = 5,
}

impl TrackingResult {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::NotConnected,
            2 => Self::DeviceMissing,
            3 => Self::InvalidFramerateMode,
            4 => Self::AlreadyRunningDifferentFramerate,
            5 => Self::Failure,
            _ => return None,
        })
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::DeviceMissing
                | Self::AlreadyRunningDifferentFramerate
                | Self::Failure
        )
    }
}

/// Outcome of [`crate::TrackerClient::calibrate`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrateResult {
    Success = 0,
    NotConnected = 1,
    /// No device, or tracking was not requested.
    NotTracking = 2,
    InvalidCalibrationMode = 3,
    /// A calibration is already running; requests are not queued.
    AlreadyCalibrating = 4,
    /// Aborted by the operator or did not converge.
    Failure = 5,
}

impl CalibrateResult {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::NotConnected,
            2 => Self::NotTracking,
            3 => Self::InvalidCalibrationMode,
            4 => Self::AlreadyCalibrating,
            5 => Self::Failure,
            _ => return None,
        })
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::NotTracking | Self::AlreadyCalibrating | Self::Failure
        )
    }
}

/// Lifecycle of a [`crate::TrackerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    TornDown,
}

/// Per-session delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Samples accepted in index order.
    pub samples_delivered: u64,
    /// Frames missing between consecutive indices.
    pub samples_dropped: u64,
    /// Samples rejected because their index repeated or went backwards.
    pub samples_discarded: u64,
}

bitflags::bitflags! {
    /// Notification channels a sink wants to receive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Channels: u32 {
        const GAZE_SAMPLE         = 1 << 0;
        const CONNECTION_CLOSED   = 1 << 1;
        const DEVICE_CONNECTED    = 1 << 2;
        const DEVICE_DISCONNECTED = 1 << 3;
        const TRACKING_STOPPED    = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_codes() {
        for code in 0..5 {
            assert_eq!(ConnectResult::from_code(code).unwrap() as i32, code);
        }
        assert_eq!(ConnectResult::from_code(5), None);
        assert_eq!(ConnectResult::from_code(-1), None);
    }

    #[test]
    fn test_tracking_and_calibrate_codes() {
        for code in 0..6 {
            assert_eq!(TrackingResult::from_code(code).unwrap() as i32, code);
            assert_eq!(CalibrateResult::from_code(code).unwrap() as i32, code);
        }
        assert_eq!(TrackingResult::from_code(6), None);
        assert_eq!(CalibrateResult::from_code(i32::MAX), None);
    }

    #[test]
    fn test_retry_classification() {
        assert!(ConnectResult::Timeout.retryable());
        assert!(!ConnectResult::VersionMismatch.retryable());
        assert!(TrackingResult::DeviceMissing.retryable());
        assert!(!TrackingResult::InvalidFramerateMode.retryable());
        assert!(!CalibrateResult::InvalidCalibrationMode.retryable());
        assert!(CalibrateResult::AlreadyCalibrating.retryable());
    }

    #[test]
    fn test_por_prefers_filtered() {
        let raw = Point2D { x: 1.0, y: 2.0 };
        let filtered = Point2D { x: 3.0, y: 4.0 };
        let mut sample = GazeSample {
            timestamp_micros: 0,
            index: 0,
            por_raw: Some(raw),
            por_filtered: Some(filtered),
            por_left: None,
            por_right: Some(raw),
            eye_position_left: None,
            eye_position_right: None,
            pupil_radius_left: None,
            pupil_radius_right: None,
        };
        assert_eq!(sample.por(), Some(filtered));
        sample.por_filtered = None;
        assert_eq!(sample.por(), Some(raw));
        assert!(!sample.is_binocular());
    }

    #[test]
    fn test_device_identity_lossy() {
        let dev = DeviceIdentity {
            id: 7,
            name: b"EyeLogic LT\0\0".to_vec(),
            token: b"SN-1234".to_vec(),
        };
        assert_eq!(dev.name_lossy(), "EyeLogic LT");
        assert_eq!(dev.token_lossy(), "SN-1234");
    }
}
