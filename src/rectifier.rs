//! Rectification of the strip into canonical coordinates.
//!
//! `rdt_from_image` is the similarity mapping frame pixels to strip units,
//! solved from the localizer's two outermost correspondences. Two fixed
//! output mappings are composed on top of it:
//!
//! - `strip_image_from_rdt`: uniform pixels-per-unit scale for the full strip
//! - `window_image_from_rdt`: crops the result window band and stretches it to
//!   the classifier's square input
//!
//! The inverse of `rdt_from_image` places the canonical outline in the frame,
//! which is then mapped into display pixels for the overlay.

use crate::config::StripConfig;
use crate::fiducial::StripGeometry;
use crate::frame::Frame;
use crate::geometry::{frame_to_display, Transform2D};
use crate::localizer::{Correspondence, LocalizerSolution};
use crate::outline::Outline;
use crate::utils::safe_cast::f64_to_u32_clamp;
use crate::utils::{warp_image, MAX_WARP_DIMENSION};
use image::RgbImage;
use log::{debug, warn};
use nalgebra::Point2;

/// Rectified views of one frame
#[derive(Debug, Clone, Default)]
pub struct RdtResult {
    found: bool,
    /// Full strip in canonical orientation
    pub strip: Option<RgbImage>,
    /// Result window at classifier resolution
    pub window: Option<RgbImage>,
    outline: Option<Outline>,
    /// Outline in frame pixels
    pub frame_outline: Option<Outline>,
    /// Frame pixels to strip units
    pub rdt_from_image: Option<Transform2D>,
}

impl RdtResult {
    /// Nothing located in this frame
    #[must_use]
    pub fn not_found() -> Self {
        Self::default()
    }

    /// Whether the strip was located and rectified
    #[must_use]
    pub const fn found(&self) -> bool {
        self.found
    }

    /// Outline in display pixels; present exactly when `found`
    #[must_use]
    pub const fn outline(&self) -> Option<&Outline> {
        self.outline.as_ref()
    }
}

/// Builds rectification transforms and extracts rectified images
#[derive(Debug, Clone)]
pub struct GeometricRectifier {
    geometry: StripGeometry,
    pixels_per_unit: f64,
    window_size: u32,
    display_size: (u32, u32),
}

impl GeometricRectifier {
    #[must_use]
    pub fn new(geometry: StripGeometry, config: &StripConfig, display_size: (u32, u32)) -> Self {
        Self {
            pixels_per_unit: f64::from(config.strip_output_height) / geometry.length(),
            geometry,
            window_size: config.window_size,
            display_size,
        }
    }

    /// Similarity mapping image points to strip units, from two correspondences
    #[must_use]
    pub fn rdt_from_image(&self, correspondences: &[Correspondence]) -> Option<Transform2D> {
        let [(role_a, image_a), (role_b, image_b)] = correspondences else {
            return None;
        };
        let target_a = self.geometry.canonical_point(*role_a)?;
        let target_b = self.geometry.canonical_point(*role_b)?;
        Transform2D::similarity_from_pairs([*image_a, *image_b], [target_a, target_b])
    }

    /// Strip units to rectified strip pixels
    #[must_use]
    pub fn strip_image_from_rdt(&self) -> Transform2D {
        Transform2D::scale(self.pixels_per_unit, self.pixels_per_unit)
    }

    /// Rectified strip size in pixels
    #[must_use]
    pub fn strip_size(&self) -> (u32, u32) {
        (
            f64_to_u32_clamp(self.geometry.width() * self.pixels_per_unit, 1, MAX_WARP_DIMENSION),
            f64_to_u32_clamp(self.geometry.length() * self.pixels_per_unit, 1, MAX_WARP_DIMENSION),
        )
    }

    /// Strip units to window pixels: the band `[top, bottom]` fills the square window
    #[must_use]
    pub fn window_image_from_rdt(&self) -> Transform2D {
        let (top, bottom) = self.geometry.window_band();
        let size = f64::from(self.window_size);
        Transform2D::translation(0.0, -top).then(&Transform2D::scale(
            size / self.geometry.width(),
            size / (bottom - top),
        ))
    }

    /// Canonical outline mapped back into the frame
    #[must_use]
    pub fn outline_in_frame(&self, rdt_from_image: &Transform2D) -> Option<Outline> {
        let image_from_rdt = rdt_from_image.inverse()?;
        let (w, l) = (self.geometry.width(), self.geometry.length());
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, l),
            Point2::new(0.0, l),
        ];
        Some(Outline::from_corners(corners).transformed(&image_from_rdt))
    }

    /// Frame pixels to display pixels for a frame of the given shape
    #[must_use]
    pub fn display_from_frame(&self, frame_width: u32, frame_height: u32, rotation_degrees: i32) -> Transform2D {
        frame_to_display(
            frame_width,
            frame_height,
            self.display_size.0,
            self.display_size.1,
            rotation_degrees,
            false,
        )
    }

    /// Rectify a frame given the localizer result.
    ///
    /// Degenerate geometry or failed extraction yields [`RdtResult::not_found`].
    #[must_use]
    pub fn rectify(&self, frame: &Frame, solution: Option<&LocalizerSolution>) -> RdtResult {
        let Some(solution) = solution else {
            return RdtResult::not_found();
        };
        let Some(rdt_from_image) = self.rdt_from_image(&solution.correspondences) else {
            debug!("Degenerate correspondences {:?}", solution.correspondences);
            return RdtResult::not_found();
        };
        let Some(frame_outline) = self.outline_in_frame(&rdt_from_image) else {
            debug!("Rectification transform is singular");
            return RdtResult::not_found();
        };

        let (strip_width, strip_height) = self.strip_size();
        let strip = match warp_image(
            frame.image(),
            &rdt_from_image.then(&self.strip_image_from_rdt()),
            strip_width,
            strip_height,
        ) {
            Ok(strip) => strip,
            Err(e) => {
                warn!("Strip extraction failed: {e}");
                return RdtResult::not_found();
            }
        };
        let window = match warp_image(
            frame.image(),
            &rdt_from_image.then(&self.window_image_from_rdt()),
            self.window_size,
            self.window_size,
        ) {
            Ok(window) => window,
            Err(e) => {
                warn!("Window extraction failed: {e}");
                return RdtResult::not_found();
            }
        };

        let display_from_frame = self.display_from_frame(frame.width(), frame.height(), frame.rotation_degrees());
        RdtResult {
            found: true,
            strip: Some(strip),
            window: Some(window),
            outline: Some(frame_outline.transformed(&display_from_frame)),
            frame_outline: Some(frame_outline),
            rdt_from_image: Some(rdt_from_image),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RotatedRect;

    fn rectifier() -> GeometricRectifier {
        let config = StripConfig::default();
        GeometricRectifier::new(StripGeometry::from_config(&config), &config, (480, 640))
    }

    fn solution(a: Point2<f64>, b: Point2<f64>) -> LocalizerSolution {
        LocalizerSolution {
            roles: vec![0, 4],
            correspondences: [(0, a), (4, b)],
            scale: 1.0,
            rotation_degrees: 90.0,
            error: 0.0,
            footprint: RotatedRect {
                center: [0.0, 0.0],
                length: 1.0,
                width: 1.0,
                angle_degrees: 0.0,
            },
            footprint_bounds: None,
        }
    }

    #[test]
    fn test_canonical_points_give_identity() {
        let rectifier = rectifier();
        let t = rectifier
            .rdt_from_image(&[(0, Point2::new(2.5, 6.5)), (4, Point2::new(2.5, 72.5))])
            .unwrap();
        assert!(t.approx_eq(&Transform2D::identity(), 1e-12));
    }

    #[test]
    fn test_window_band_maps_to_window_square() {
        let rectifier = rectifier();
        let t = rectifier.window_image_from_rdt();
        let top_left = t.apply(Point2::new(0.0, 51.0));
        let bottom_right = t.apply(Point2::new(5.0, 61.0));
        assert!(top_left.coords.norm() < 1e-9);
        assert!((bottom_right - Point2::new(300.0, 300.0)).norm() < 1e-9);
    }

    #[test]
    fn test_strip_size_follows_aspect() {
        let (w, h) = rectifier().strip_size();
        assert_eq!(h, 640);
        assert_eq!(w, 37);
    }

    #[test]
    fn test_rectify_found_has_outline() {
        let rectifier = rectifier();
        let frame = Frame::new(RgbImage::new(480, 640), 0).unwrap();
        let result = rectifier.rectify(&frame, Some(&solution(Point2::new(240.0, 100.0), Point2::new(240.0, 500.0))));

        assert!(result.found());
        assert!(result.outline().is_some());
        assert_eq!(result.window.as_ref().map(RgbImage::dimensions), Some((300, 300)));
        assert_eq!(result.strip.as_ref().map(RgbImage::dimensions), Some((37, 640)));
    }

    #[test]
    fn test_degenerate_geometry_not_found() {
        let rectifier = rectifier();
        let frame = Frame::new(RgbImage::new(100, 100), 0).unwrap();
        let p = Point2::new(50.0, 50.0);
        let result = rectifier.rectify(&frame, Some(&solution(p, p)));

        assert!(!result.found());
        assert!(result.outline().is_none());
        assert!(result.strip.is_none());
        assert!(!rectifier.rectify(&frame, None).found());
        assert!(rectifier.rdt_from_image(&[(0, p)]).is_none());
    }
}
