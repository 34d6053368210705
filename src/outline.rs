//! Strip outline polygons and the "is the strip centred" check.

use crate::config::CaptureConfig;
use crate::geometry::Transform2D;
use nalgebra::Point2;
use serde::Serialize;

/// Number of points in a closed outline (four edges, two endpoints each)
pub const OUTLINE_POINTS: usize = 8;

/// Closed quadrilateral as an 8-point line list.
///
/// Corner order is top-left, top-right, bottom-right, bottom-left of the
/// canonical strip; each edge contributes both endpoints so the list can be
/// drawn as independent line segments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Outline {
    pub points: [[f64; 2]; OUTLINE_POINTS],
}

impl Outline {
    /// Build from four corners in drawing order
    #[must_use]
    pub fn from_corners(corners: [Point2<f64>; 4]) -> Self {
        let mut points = [[0.0; 2]; OUTLINE_POINTS];
        for (edge, pair) in points.chunks_exact_mut(2).enumerate() {
            let start = corners[edge];
            let end = corners[(edge + 1) % 4];
            pair[0] = [start.x, start.y];
            pair[1] = [end.x, end.y];
        }
        Self { points }
    }

    /// Map every point through `transform`
    #[must_use]
    pub fn transformed(&self, transform: &Transform2D) -> Self {
        let mut points = self.points;
        for p in &mut points {
            let mapped = transform.apply(Point2::new(p[0], p[1]));
            *p = [mapped.x, mapped.y];
        }
        Self { points }
    }

    /// Canonical top edge appears below the canonical bottom edge
    #[must_use]
    pub fn is_upside_down(&self) -> bool {
        self.points[0][1] > self.points[3][1]
    }

    /// Largest per-coordinate distance to `other`, point by point
    #[must_use]
    pub fn max_deviation(&self, other: &Self, shift: usize) -> f64 {
        self.points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let q = other.points[(i + shift) % OUTLINE_POINTS];
                (p[0] - q[0]).abs().max((p[1] - q[1]).abs())
            })
            .fold(0.0, f64::max)
    }
}

/// Desired on-screen strip placement and the tolerance around it
#[derive(Debug, Clone, PartialEq)]
pub struct CenteringGuide {
    desired: Outline,
    tolerance_px: f64,
}

impl CenteringGuide {
    /// Desired outline for a strip with aspect `width / length` on the configured display
    #[must_use]
    pub fn new(strip_aspect: f64, config: &CaptureConfig) -> Self {
        let display_width = f64::from(config.display_width);
        let display_height = f64::from(config.display_height);

        let height = display_height * config.strip_height_fraction;
        let width = height * strip_aspect;
        let left = (display_width - width) / 2.0;
        let top = display_height * config.instruction_height_fraction;

        let desired = Outline::from_corners([
            Point2::new(left, top),
            Point2::new(left + width, top),
            Point2::new(left + width, top + height),
            Point2::new(left, top + height),
        ]);

        Self {
            desired,
            tolerance_px: display_height * config.centering_tolerance,
        }
    }

    #[must_use]
    pub const fn desired(&self) -> &Outline {
        &self.desired
    }

    /// Allowed per-coordinate deviation in display pixels
    #[must_use]
    pub const fn tolerance_px(&self) -> f64 {
        self.tolerance_px
    }

    /// Every outline coordinate lies within tolerance of the desired outline.
    /// A strip held upside down is compared against the half-turned outline.
    #[must_use]
    pub fn is_centered(&self, outline: &Outline) -> bool {
        let shift = if outline.is_upside_down() { OUTLINE_POINTS / 2 } else { 0 };
        outline.max_deviation(&self.desired, shift) <= self.tolerance_px
    }
}
