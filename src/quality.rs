//! Sharpness and exposure gating of rectified regions.
//!
//! Sharpness is the variance of the 4-neighbour Laplacian of the grayscale
//! region (reflect-101 borders). Exposure is read from a 256-bin brightness
//! histogram: the brightest occupied level and the number of pixels in the
//! top bin. Both metrics are recomputed for every region.

use crate::config::QualityConfig;
use image::imageops;
use image::{GrayImage, RgbImage};
use serde::Serialize;

/// Exposure classification of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Exposure {
    UnderExposed,
    Normal,
    OverExposed,
}

/// Resolution class a threshold applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Low-resolution preview stream
    Preview,
    /// Full-resolution still capture
    Still,
}

/// Quality measurement of one region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityStatus {
    /// Laplacian variance
    pub sharpness: f64,
    /// Whether sharpness clears the threshold for the resolution
    pub sharp: bool,
    pub exposure: Exposure,
    pub resolution: Resolution,
}

impl QualityStatus {
    /// Sharp and normally exposed
    #[must_use]
    pub fn is_acceptable(&self) -> bool {
        self.sharp && self.exposure == Exposure::Normal
    }
}

/// Sharpness and exposure thresholds
#[derive(Debug, Clone)]
pub struct ImageQualityFilter {
    config: QualityConfig,
}

impl ImageQualityFilter {
    #[must_use]
    pub const fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Measure an RGB region
    #[must_use]
    pub fn assess(&self, region: &RgbImage, resolution: Resolution) -> QualityStatus {
        let gray = imageops::grayscale(region);
        let sharpness = sharpness(&gray);
        QualityStatus {
            sharpness,
            sharp: self.is_sharp(sharpness, resolution),
            exposure: self.exposure(&gray),
            resolution,
        }
    }

    /// Threshold for a resolution class
    #[must_use]
    pub const fn sharpness_threshold(&self, resolution: Resolution) -> f64 {
        match resolution {
            Resolution::Preview => self.config.preview_sharpness_threshold,
            Resolution::Still => self.config.still_sharpness_threshold,
        }
    }

    /// Strictly above the threshold
    #[must_use]
    pub fn is_sharp(&self, sharpness: f64, resolution: Resolution) -> bool {
        sharpness > self.sharpness_threshold(resolution)
    }

    /// Classify exposure of a grayscale region
    #[must_use]
    pub fn exposure(&self, gray: &GrayImage) -> Exposure {
        let histogram = histogram(gray);
        let Some(max_white) = histogram.iter().rposition(|&count| count > 0) else {
            return Exposure::UnderExposed;
        };
        let clip_count = histogram[255];

        if max_white >= usize::from(self.config.over_exposure_threshold)
            && clip_count > self.config.clip_count_threshold
        {
            Exposure::OverExposed
        } else if max_white < usize::from(self.config.under_exposure_threshold) {
            Exposure::UnderExposed
        } else {
            Exposure::Normal
        }
    }
}

/// 256-bin brightness histogram
#[must_use]
pub fn histogram(gray: &GrayImage) -> [u32; 256] {
    let mut bins = [0u32; 256];
    for pixel in gray.pixels() {
        let bin = &mut bins[usize::from(pixel[0])];
        *bin = bin.saturating_add(1);
    }
    bins
}

/// Variance of the 4-neighbour Laplacian
#[must_use]
#[allow(clippy::cast_precision_loss)] // Pixel counts are far below f64 precision limits
pub fn sharpness(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let (w, h) = (width as usize, height as usize);
    let data = gray.as_raw();
    let at = |x: usize, y: usize| f64::from(data[y * w + x]);

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 0..h {
        let up = reflect101(y, -1, h);
        let down = reflect101(y, 1, h);
        for x in 0..w {
            let left = reflect101(x, -1, w);
            let right = reflect101(x, 1, w);
            let response = at(left, y) + at(right, y) + at(x, up) + at(x, down) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let n = (w * h) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Neighbour index with `dcb|abcd|cba` border handling
fn reflect101(index: usize, step: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    match index.checked_add_signed(step) {
        None => 1,
        Some(i) if i >= len => len - 2,
        Some(i) => i,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn filter() -> ImageQualityFilter {
        ImageQualityFilter::new(QualityConfig::default())
    }

    #[test]
    fn test_flat_region_is_not_sharp() {
        let gray = GrayImage::from_pixel(32, 32, Luma([128]));
        assert!(sharpness(&gray).abs() < 1e-12);

        let status = filter().assess(&RgbImage::from_pixel(32, 32, Rgb([128, 128, 128])), Resolution::Preview);
        assert!(!status.sharp);
        assert!(!status.is_acceptable());
    }

    #[test]
    fn test_checkerboard_is_sharp() {
        let gray = GrayImage::from_fn(32, 32, |x, y| Luma([if (x / 2 + y / 2) % 2 == 0 { 40 } else { 200 }]));
        let value = sharpness(&gray);
        assert!(value > 1000.0, "sharpness {value}");
        assert!(filter().is_sharp(value, Resolution::Still));
    }

    #[test]
    fn test_sharpness_single_impulse() {
        // One bright pixel in a 3x3 zero image; borders reflect to interior pixels
        let mut gray = GrayImage::new(3, 3);
        gray.put_pixel(1, 1, Luma([4]));
        let expected_responses = [-16.0f64, 4.0, 4.0, 4.0, 4.0, 8.0, 8.0, 8.0, 8.0];
        let mean = expected_responses.iter().sum::<f64>() / 9.0;
        let variance = expected_responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 9.0;
        assert!((sharpness(&gray) - variance).abs() < 1e-9);
    }

    #[test]
    fn test_exposure_classes() {
        let filter = filter();
        assert_eq!(filter.exposure(&GrayImage::from_pixel(20, 20, Luma([255]))), Exposure::OverExposed);
        assert_eq!(filter.exposure(&GrayImage::from_pixel(20, 20, Luma([60]))), Exposure::UnderExposed);
        assert_eq!(filter.exposure(&GrayImage::from_pixel(20, 20, Luma([180]))), Exposure::Normal);

        // A few clipped pixels do not make the region over-exposed
        let mut gray = GrayImage::from_pixel(20, 20, Luma([180]));
        for x in 0..10 {
            gray.put_pixel(x, 0, Luma([255]));
        }
        assert_eq!(filter.exposure(&gray), Exposure::Normal);
    }

    #[test]
    fn test_threshold_depends_on_resolution() {
        let filter = filter();
        assert!(filter.is_sharp(50.0, Resolution::Preview));
        assert!(!filter.is_sharp(50.0, Resolution::Still));
        assert!(!filter.is_sharp(10.0, Resolution::Preview));
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(0, -1, 5), 1);
        assert_eq!(reflect101(4, 1, 5), 3);
        assert_eq!(reflect101(2, 1, 5), 3);
        assert_eq!(reflect101(0, 1, 1), 0);
    }
}
