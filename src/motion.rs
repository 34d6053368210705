//! Motion stability tracking for preview frames.
//!
//! Each preview frame is reduced to the tracking resolution by successive
//! blur-and-decimate steps. The translation between the previous reduced
//! frame and the current one is estimated with an iterative intensity
//! alignment, scaled back to full-resolution pixels and pushed into a bounded
//! window. A frame is steady when both the latest translation and the sum of
//! the window stay within their limits.

use crate::config::MotionConfig;
use crate::constants::PYRAMID_BLUR_SIGMA;
use image::{imageops, GrayImage, ImageBuffer, Luma, RgbImage};
use log::{debug, trace};
use nalgebra::{Matrix2, Vector2};
use serde::Serialize;
use std::collections::VecDeque;

/// Minimum number of overlapping pixels for a usable alignment
const MIN_ALIGNMENT_PIXELS: usize = 16;

/// Outcome of one tracker update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReport {
    /// Translation since the previous frame, full-resolution pixels
    pub instantaneous: Vector2<f64>,
    /// Sum of every translation in the window
    pub window_sum: Vector2<f64>,
    pub steady: bool,
    /// This frame only established the reference
    pub bootstrapped: bool,
}

/// Copy of tracker state for readers outside the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MotionSnapshot {
    /// Last translation magnitude
    pub last: f64,
    /// Window sum magnitude
    pub window_sum: f64,
    pub samples: usize,
    pub steady: bool,
}

/// Frame-to-frame translation tracker with a sliding window
#[derive(Debug, Clone)]
pub struct MotionStabilityTracker {
    config: MotionConfig,
    reference: Option<GrayImage>,
    samples: VecDeque<Vector2<f64>>,
    last: Option<MotionReport>,
}

impl MotionStabilityTracker {
    #[must_use]
    pub fn new(config: MotionConfig) -> Self {
        Self {
            samples: VecDeque::with_capacity(config.window_capacity),
            config,
            reference: None,
            last: None,
        }
    }

    /// Feed a preview frame and report whether the camera is steady
    pub fn update(&mut self, image: &RgbImage) -> MotionReport {
        let current = reduce(&imageops::grayscale(image), self.config.pyramid_levels);

        let reference = match self.reference.take() {
            Some(reference) if reference.dimensions() == current.dimensions() => reference,
            previous => {
                if previous.is_some() {
                    debug!("Tracking resolution changed, restarting motion reference");
                }
                self.reference = Some(current);
                let report = MotionReport {
                    instantaneous: Vector2::zeros(),
                    window_sum: self.window_sum(),
                    steady: self.config.bootstrap_steady,
                    bootstrapped: true,
                };
                self.last = Some(report);
                return report;
            }
        };

        let scale = f64::from(1u32 << self.config.pyramid_levels.min(16));
        let motion = match estimate_translation(&reference, &current, self.config.max_iterations, self.config.epsilon) {
            Some(shift) => shift * scale,
            None => {
                debug!("Alignment failed, treating motion as maximal");
                let (w, h) = image.dimensions();
                Vector2::new(f64::from(w.max(h)), 0.0)
            }
        };
        self.reference = Some(current);

        if self.samples.len() >= self.config.window_capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(motion);

        let window_sum = self.window_sum();
        let steady = motion.norm() <= self.config.max_frame_translation
            && window_sum.norm() <= self.config.max_window_translation;
        trace!(
            "Motion ({:.2}, {:.2}) window ({:.2}, {:.2}) steady={steady}",
            motion.x,
            motion.y,
            window_sum.x,
            window_sum.y
        );

        let report = MotionReport {
            instantaneous: motion,
            window_sum,
            steady,
            bootstrapped: false,
        };
        self.last = Some(report);
        report
    }

    /// Current state for display
    #[must_use]
    pub fn snapshot(&self) -> MotionSnapshot {
        self.last.map_or_else(MotionSnapshot::default, |report| MotionSnapshot {
            last: report.instantaneous.norm(),
            window_sum: report.window_sum.norm(),
            samples: self.samples.len(),
            steady: report.steady,
        })
    }

    /// Samples currently in the window
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Forget the reference and the window
    pub fn reset(&mut self) {
        self.reference = None;
        self.samples.clear();
        self.last = None;
    }

    fn window_sum(&self) -> Vector2<f64> {
        self.samples.iter().fold(Vector2::zeros(), |acc, v| acc + v)
    }
}

/// Blur and halve `levels` times
#[must_use]
pub fn reduce(gray: &GrayImage, levels: u32) -> GrayImage {
    let mut current = gray.clone();
    for _ in 0..levels {
        let (w, h) = current.dimensions();
        if w < 2 || h < 2 {
            break;
        }
        current = decimate(&blur(&current, PYRAMID_BLUR_SIGMA));
    }
    current
}

#[allow(clippy::cast_possible_truncation)] // Values are clamped to [0, 255]
#[allow(clippy::cast_sign_loss)] // Values are clamped to [0, 255]
fn blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let unit = ImageBuffer::<Luma<f32>, Vec<f32>>::from_fn(w, h, |x, y| {
        Luma([f32::from(gray.get_pixel(x, y)[0]) / 255.0])
    });
    let blurred = imageproc::filter::gaussian_blur_f32(&unit, sigma);
    GrayImage::from_fn(w, h, |x, y| {
        let v = blurred.get_pixel(x, y)[0].clamp(0.0, 1.0);
        Luma([(v * 255.0).round() as u8])
    })
}

fn decimate(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    GrayImage::from_fn(w / 2, h / 2, |x, y| *gray.get_pixel(x * 2, y * 2))
}

/// Translation `p` such that `current(x + p) ≈ reference(x)`.
///
/// Gauss-Newton on the intensity difference with the Hessian built from
/// the reference gradients. `None` when the problem is ill-conditioned or
/// the images barely overlap.
#[must_use]
#[allow(clippy::cast_precision_loss)] // Image coordinates fit in f64
pub fn estimate_translation(
    reference: &GrayImage,
    current: &GrayImage,
    max_iterations: usize,
    epsilon: f64,
) -> Option<Vector2<f64>> {
    let (w, h) = reference.dimensions();
    if w < 3 || h < 3 || current.dimensions() != (w, h) {
        return None;
    }

    let gx = imageproc::gradients::horizontal_scharr(reference);
    let gy = imageproc::gradients::vertical_scharr(reference);
    let (gx, gy) = (gx.as_raw(), gy.as_raw());
    let width = w as usize;
    let template = reference.as_raw();

    let mut p = Vector2::zeros();
    for iteration in 0..max_iterations {
        let mut hessian = Matrix2::zeros();
        let mut b = Vector2::zeros();
        let mut count = 0usize;

        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let Some(sample) = crate::utils::sample_bilinear(current, f64::from(x) + p.x, f64::from(y) + p.y)
                else {
                    continue;
                };
                let i = y as usize * width + x as usize;
                // Scharr responses are 32x the unit derivative
                let g = Vector2::new(f64::from(gx[i]) / 32.0, f64::from(gy[i]) / 32.0);
                let error = f64::from(sample[0]) - f64::from(template[i]);
                hessian += g * g.transpose();
                b += g * error;
                count += 1;
            }
        }

        if count < MIN_ALIGNMENT_PIXELS || hessian.determinant().abs() < 1e-6 {
            return None;
        }
        let delta = hessian.try_inverse()? * b;
        if !delta.x.is_finite() || !delta.y.is_finite() {
            return None;
        }
        p -= delta;
        if delta.norm() < epsilon {
            trace!("Alignment converged after {} iterations", iteration + 1);
            break;
        }
    }

    (p.x.is_finite() && p.y.is_finite()).then_some(p)
}
