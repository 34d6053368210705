//! Motion stability over frame sequences

use image::{Rgb, RgbImage};
use rdt_reader::config::MotionConfig;
use rdt_reader::motion::MotionStabilityTracker;
use std::f64::consts::TAU;

/// Smooth pattern moved `shift` pixels to the right
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scene(shift: f64) -> RgbImage {
    RgbImage::from_fn(480, 640, |x, y| {
        let fx = f64::from(x) - shift;
        let v = 128.0 + 50.0 * (fx * TAU / 160.0).sin() + 40.0 * (f64::from(y) * TAU / 120.0).cos();
        let v = v.round() as u8;
        Rgb([v, v, v])
    })
}

#[test]
fn test_still_camera_is_steady() {
    let mut tracker = MotionStabilityTracker::new(MotionConfig::default());
    let frame = scene(0.0);
    assert!(!tracker.update(&frame).steady);
    for _ in 0..15 {
        assert!(tracker.update(&frame).steady);
    }
    let snapshot = tracker.snapshot();
    assert!(snapshot.steady);
    assert_eq!(snapshot.samples, MotionConfig::default().window_capacity);
}

#[test]
fn test_fast_pan_is_not_steady() {
    let mut tracker = MotionStabilityTracker::new(MotionConfig::default());
    tracker.update(&scene(0.0));
    for i in 1..6 {
        let report = tracker.update(&scene(24.0 * f64::from(i)));
        assert!(!report.steady, "frame {i}");
        assert!((report.instantaneous.x - 24.0).abs() < 2.0, "frame {i}: {:?}", report.instantaneous);
    }
}

#[test]
fn test_slow_drift_accumulates_in_window() {
    let mut tracker = MotionStabilityTracker::new(MotionConfig::default());
    tracker.update(&scene(0.0));

    let first = tracker.update(&scene(4.0));
    assert!(first.steady, "{first:?}");

    let mut last = first;
    for i in 2..8 {
        last = tracker.update(&scene(4.0 * f64::from(i)));
    }
    // Each step is small, but seven of them exceed the window limit
    assert!(last.instantaneous.norm() < 10.0);
    assert!(last.window_sum.norm() > 20.0);
    assert!(!last.steady);
}

#[test]
fn test_resolution_change_restarts_reference() {
    let mut tracker = MotionStabilityTracker::new(MotionConfig::default());
    tracker.update(&scene(0.0));
    tracker.update(&scene(0.0));
    let report = tracker.update(&RgbImage::from_pixel(320, 240, Rgb([10, 10, 10])));
    assert!(report.bootstrapped);
}
