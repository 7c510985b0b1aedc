use eyelogic::ffi::{ELCGazeSample, ELCPoint2d, ELCPoint3d};
use eyelogic::Sentinel;
use proptest::prelude::*;

const INVALID: f64 = f64::MIN;

/// A coordinate that is either a real measurement or the sentinel.
fn coordinate() -> impl Strategy<Value = (bool, f64)> {
    (any::<bool>(), -1.0e6f64..1.0e6).prop_map(|(invalid, v)| {
        if invalid {
            (true, INVALID)
        } else {
            (false, v)
        }
    })
}

proptest! {
    #[test]
    fn point2d_absent_iff_any_component_invalid(
        (x_bad, x) in coordinate(),
        (y_bad, y) in coordinate(),
    ) {
        let s = Sentinel::new(INVALID);
        let p = s.point2d(ELCPoint2d { x, y });
        prop_assert_eq!(p.is_none(), x_bad || y_bad);
        if let Some(p) = p {
            prop_assert_eq!((p.x, p.y), (x, y));
        }
    }

    #[test]
    fn point3d_absent_iff_any_component_invalid(
        (x_bad, x) in coordinate(),
        (y_bad, y) in coordinate(),
        (z_bad, z) in coordinate(),
    ) {
        let s = Sentinel::new(INVALID);
        let p = s.point3d(ELCPoint3d { x, y, z });
        prop_assert_eq!(p.is_none(), x_bad || y_bad || z_bad);
    }

    #[test]
    fn sample_fields_follow_their_raw_values(
        (por_bad, por) in coordinate(),
        (left_bad, left) in coordinate(),
        (pupil_bad, pupil) in coordinate(),
        index in any::<i32>(),
        ts in any::<i64>(),
    ) {
        let s = Sentinel::new(INVALID);
        let mut raw = ELCGazeSample::invalid(INVALID, ts, index);
        raw.porFiltered = ELCPoint2d { x: por, y: 1.0 };
        raw.porLeft = ELCPoint2d { x: 2.0, y: left };
        raw.pupilRadiusRight = pupil;

        let sample = s.sample(&raw);
        prop_assert_eq!(sample.index, index);
        prop_assert_eq!(sample.timestamp_micros, ts);
        prop_assert_eq!(sample.por_filtered.is_none(), por_bad);
        prop_assert_eq!(sample.por_left.is_none(), left_bad);
        prop_assert_eq!(sample.pupil_radius_right, (!pupil_bad).then_some(pupil));
        // Fields left at the sentinel stay absent.
        prop_assert!(sample.por_raw.is_none());
        prop_assert!(sample.eye_position_left.is_none());
        prop_assert!(sample.pupil_radius_left.is_none());
    }

    #[test]
    fn nan_sentinel_is_detected(v in -1.0e6f64..1.0e6) {
        let s = Sentinel::new(f64::NAN);
        prop_assert_eq!(s.scalar(v), Some(v));
        prop_assert!(s.scalar(f64::NAN).is_none());
        let p = ELCPoint2d { x: v, y: f64::NAN };
        prop_assert!(s.point2d(p).is_none());
    }
}
