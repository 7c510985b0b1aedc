use crate::ffi::{ELCGazeSample, ELCPoint2d, ELCPoint3d};
use crate::types::{GazeSample, Point2D, Point3D};

/// The native "no measurement" marker, read once when the library loads.
///
/// Converts raw native values into `Option`s so nothing above the boundary
/// compares against the magic constant.
#[derive(Debug, Clone, Copy)]
pub struct Sentinel(f64);

impl Sentinel {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// True when `v` is the sentinel. Bit-exact so a NaN sentinel still matches.
    pub fn is_invalid(self, v: f64) -> bool {
        v == self.0 || v.to_bits() == self.0.to_bits()
    }

    pub fn scalar(self, v: f64) -> Option<f64> {
        (!self.is_invalid(v)).then_some(v)
    }

    /// A point with any sentinel component is treated as absent.
    pub fn point2d(self, p: ELCPoint2d) -> Option<Point2D> {
        if self.is_invalid(p.x) || self.is_invalid(p.y) {
            return None;
        }
        Some(Point2D { x: p.x, y: p.y })
    }

    pub fn point3d(self, p: ELCPoint3d) -> Option<Point3D> {
        if self.is_invalid(p.x) || self.is_invalid(p.y) || self.is_invalid(p.z) {
            return None;
        }
        Some(Point3D {
            x: p.x,
            y: p.y,
            z: p.z,
        })
    }

    pub fn sample(self, raw: &ELCGazeSample) -> GazeSample {
        GazeSample {
            timestamp_micros: raw.timestampMicroSec,
            index: raw.index,
            por_raw: self.point2d(raw.porRaw),
            por_filtered: self.point2d(raw.porFiltered),
            por_left: self.point2d(raw.porLeft),
            por_right: self.point2d(raw.porRight),
            eye_position_left: self.point3d(raw.eyePositionLeft),
            eye_position_right: self.point3d(raw.eyePositionRight),
            pupil_radius_left: self.scalar(raw.pupilRadiusLeft),
            pupil_radius_right: self.scalar(raw.pupilRadiusRight),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVALID: f64 = -1.797_693_134_862_315_7e308;

    #[test]
    fn test_scalar() {
        let s = Sentinel::new(INVALID);
        assert_eq!(s.scalar(2.5), Some(2.5));
        assert_eq!(s.scalar(INVALID), None);
        assert_eq!(s.scalar(0.0), Some(0.0));
    }

    #[test]
    fn test_nan_sentinel() {
        let s = Sentinel::new(f64::NAN);
        assert!(s.is_invalid(f64::NAN));
        assert!(!s.is_invalid(1.0));
    }

    #[test]
    fn test_partial_point_is_absent() {
        let s = Sentinel::new(INVALID);
        assert!(s.point2d(ELCPoint2d { x: 10.0, y: INVALID }).is_none());
        assert!(s
            .point3d(ELCPoint3d {
                x: INVALID,
                y: 1.0,
                z: 600.0
            })
            .is_none());
        assert_eq!(
            s.point2d(ELCPoint2d { x: 10.0, y: 20.0 }),
            Some(Point2D { x: 10.0, y: 20.0 })
        );
    }

    #[test]
    fn test_sample_conversion() {
        let s = Sentinel::new(INVALID);
        let mut raw = ELCGazeSample::invalid(INVALID, 1_000, 3);
        raw.porFiltered = ELCPoint2d { x: 960.0, y: 540.0 };
        raw.pupilRadiusRight = 1.8;

        let sample = s.sample(&raw);
        assert_eq!(sample.timestamp_micros, 1_000);
        assert_eq!(sample.index, 3);
        assert_eq!(sample.por_filtered, Some(Point2D { x: 960.0, y: 540.0 }));
        assert_eq!(sample.por_raw, None);
        assert_eq!(sample.eye_position_left, None);
        assert_eq!(sample.pupil_radius_left, None);
        assert_eq!(sample.pupil_radius_right, Some(1.8));
    }
}
