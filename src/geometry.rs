//! Planar geometry: homogeneous 2D transforms, boxes and rotated rectangles.
//!
//! All transforms are stored as 3x3 homogeneous matrices acting on column
//! vectors `(x, y, 1)`. [`Transform2D::then`] composes in application order,
//! so `a.then(&b)` first applies `a` and then `b`.

use crate::constants::EPSILON;
use nalgebra::{Matrix3, Point2, Vector2, Vector3};
use serde::Serialize;

/// Affine transform in homogeneous form
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    matrix: Matrix3<f64>,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform2D {
    /// Identity transform
    #[must_use]
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Wrap an existing homogeneous matrix
    #[must_use]
    pub const fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    /// Axis-aligned scale about the origin
    #[must_use]
    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::from_matrix(Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0))
    }

    /// Pure translation
    #[must_use]
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::from_matrix(Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0))
    }

    /// Rotation about the origin. Positive angles turn +x towards +y
    /// (clockwise on screen, where y points down).
    #[must_use]
    pub fn rotation_degrees(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self::from_matrix(Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0))
    }

    /// Unique similarity mapping `src[0] -> dst[0]` and `src[1] -> dst[1]`.
    ///
    /// Returns `None` when the source points coincide.
    #[must_use]
    pub fn similarity_from_pairs(src: [Point2<f64>; 2], dst: [Point2<f64>; 2]) -> Option<Self> {
        let ds = src[1] - src[0];
        let dd = dst[1] - dst[0];
        let denom = ds.norm_squared();
        if denom < EPSILON || !denom.is_finite() {
            return None;
        }

        // Complex ratio dd / ds gives (s*cos, s*sin)
        let a = (dd.x * ds.x + dd.y * ds.y) / denom;
        let b = (dd.y * ds.x - dd.x * ds.y) / denom;
        let tx = dst[0].x - (a * src[0].x - b * src[0].y);
        let ty = dst[0].y - (b * src[0].x + a * src[0].y);

        let transform = Self::from_matrix(Matrix3::new(a, -b, tx, b, a, ty, 0.0, 0.0, 1.0));
        transform.is_finite().then_some(transform)
    }

    /// Underlying matrix
    #[must_use]
    pub const fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Compose: apply `self`, then `next`
    #[must_use]
    pub fn then(&self, next: &Self) -> Self {
        Self::from_matrix(next.matrix * self.matrix)
    }

    /// Inverse transform, or `None` when singular
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let det = self.matrix.determinant();
        if det.abs() < EPSILON || !det.is_finite() {
            return None;
        }
        self.matrix.try_inverse().map(Self::from_matrix)
    }

    /// Map a single point
    #[must_use]
    pub fn apply(&self, point: Point2<f64>) -> Point2<f64> {
        let v = self.matrix * Vector3::new(point.x, point.y, 1.0);
        if v.z.abs() < EPSILON {
            Point2::new(v.x, v.y)
        } else {
            Point2::new(v.x / v.z, v.y / v.z)
        }
    }

    /// Geometric mean scale of the linear part
    #[must_use]
    pub fn scale_factor(&self) -> f64 {
        let m = &self.matrix;
        (m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]).abs().sqrt()
    }

    /// True if all entries are finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite())
    }

    /// Entry-wise comparison within `tolerance`
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.matrix
            .iter()
            .zip(other.matrix.iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

/// Map sensor-oriented frame pixels into display pixels.
///
/// Translates to the source centre, applies the sensor rotation, scales to the
/// destination (with source dimensions swapped for quarter turns) and moves to
/// the destination centre. With `maintain_aspect` the larger of the two axis
/// scales is applied uniformly.
#[must_use]
#[allow(clippy::cast_precision_loss)] // Pixel dimensions are far below f64 precision limits
pub fn frame_to_display(
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    rotation_degrees: i32,
    maintain_aspect: bool,
) -> Transform2D {
    let mut transform = Transform2D::identity();

    if rotation_degrees != 0 {
        transform = transform
            .then(&Transform2D::translation(
                -f64::from(src_width) / 2.0,
                -f64::from(src_height) / 2.0,
            ))
            .then(&Transform2D::rotation_degrees(f64::from(rotation_degrees)));
    }

    let transpose = (rotation_degrees.abs() + 90) % 180 == 0;
    let (in_width, in_height) = if transpose {
        (src_height, src_width)
    } else {
        (src_width, src_height)
    };

    if in_width != dst_width || in_height != dst_height {
        let sx = f64::from(dst_width) / f64::from(in_width.max(1));
        let sy = f64::from(dst_height) / f64::from(in_height.max(1));
        transform = if maintain_aspect {
            let s = sx.max(sy);
            transform.then(&Transform2D::scale(s, s))
        } else {
            transform.then(&Transform2D::scale(sx, sy))
        };
    }

    if rotation_degrees != 0 {
        transform = transform.then(&Transform2D::translation(
            f64::from(dst_width) / 2.0,
            f64::from(dst_height) / 2.0,
        ));
    }

    transform
}

/// Axis-aligned box in floating point frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    /// Create a box, reordering corners if needed
    #[must_use]
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Box centre
    #[must_use]
    pub fn center(&self) -> Point2<f64> {
        Point2::new(
            f64::from(self.left + self.right) / 2.0,
            f64::from(self.top + self.bottom) / 2.0,
        )
    }
}

/// Integer pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersection with `[0, width) x [0, height)`, or `None` if empty
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let max_x = i32::try_from(width).unwrap_or(i32::MAX);
        let max_y = i32::try_from(height).unwrap_or(i32::MAX);

        let left = self.x.clamp(0, max_x);
        let top = self.y.clamp(0, max_y);
        let right = self.x.saturating_add(self.width).clamp(0, max_x);
        let bottom = self.y.saturating_add(self.height).clamp(0, max_y);

        (right > left && bottom > top).then(|| Self::new(left, top, right - left, bottom - top))
    }
}

/// Rectangle rotated about its centre
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RotatedRect {
    /// Centre in frame coordinates
    pub center: [f64; 2],
    /// Extent along the rotated x axis
    pub length: f64,
    /// Extent along the rotated y axis
    pub width: f64,
    /// Rotation of the x axis in degrees
    pub angle_degrees: f64,
}

impl RotatedRect {
    /// Corner points in order around the rectangle
    #[must_use]
    pub fn corners(&self) -> [Point2<f64>; 4] {
        let (sin, cos) = self.angle_degrees.to_radians().sin_cos();
        let along = Vector2::new(cos, sin) * (self.length / 2.0);
        let across = Vector2::new(-sin, cos) * (self.width / 2.0);
        let c = Point2::new(self.center[0], self.center[1]);
        [
            c - along - across,
            c + along - across,
            c + along + across,
            c - along + across,
        ]
    }

    /// Smallest integer rectangle containing all corners
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Values are floored/ceiled and clamped to i32 range
    pub fn bounding_rect(&self) -> PixelRect {
        let corners = self.corners();
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &corners {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let bound = f64::from(i32::MAX / 2);
        let x = min_x.floor().clamp(-bound, bound) as i32;
        let y = min_y.floor().clamp(-bound, bound) as i32;
        let right = max_x.ceil().clamp(-bound, bound) as i32;
        let bottom = max_y.ceil().clamp(-bound, bound) as i32;
        PixelRect::new(x, y, right - x + 1, bottom - y + 1)
    }
}

/// Smallest absolute difference between two angles, in `[0, 180]`
#[must_use]
pub fn angle_difference_degrees(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Circular mean of angles in degrees
#[must_use]
pub fn circular_mean_degrees(angles: &[f64]) -> f64 {
    let (sin, cos) = angles.iter().fold((0.0, 0.0), |(s, c), a| {
        let (sa, ca) = a.to_radians().sin_cos();
        (s + sa, c + ca)
    });
    sin.atan2(cos).to_degrees()
}
