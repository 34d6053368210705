//! Combinatorial fiducial localization.
//!
//! Every pair (or triple) of observed roles is treated as a hypothesis for the
//! strip pose. A hypothesis yields an axis angle and a scale (image pixels per
//! strip unit); it is rejected if the angle disagrees with any detection's own
//! orientation estimate or, for triples, if its two independent scale
//! estimates disagree. Surviving hypotheses are scored by warping landmark
//! points into a normalized local frame and measuring their distance to the
//! canonical positions. The lowest score wins.

use crate::config::{LocalizerConfig, LocalizerMode};
use crate::constants::EPSILON;
use crate::fiducial::{FiducialSet, StripGeometry};
use crate::geometry::{angle_difference_degrees, circular_mean_degrees, PixelRect, RotatedRect, Transform2D};
use log::debug;
use nalgebra::{Point2, Vector2};

/// Role and its observed image position
pub type Correspondence = (usize, Point2<f64>);

/// Best strip pose hypothesis for a frame
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizerSolution {
    /// Roles in the winning combination, in axis order
    pub roles: Vec<usize>,
    /// The two outermost roles of the combination, used for rectification
    pub correspondences: [Correspondence; 2],
    /// Image pixels per strip unit
    pub scale: f64,
    /// Image angle of the strip axis (direction of increasing offset), degrees
    pub rotation_degrees: f64,
    /// Residual in strip units
    pub error: f64,
    /// Expected strip footprint in the image
    pub footprint: RotatedRect,
    /// Footprint bounds after minor-axis growth, clamped to the image
    pub footprint_bounds: Option<PixelRect>,
}

struct Candidate {
    roles: Vec<usize>,
    points: Vec<Point2<f64>>,
    scale: f64,
    rotation_degrees: f64,
    error: f64,
    span: f64,
}

/// Selects the most consistent fiducial combination
#[derive(Debug, Clone)]
pub struct FiducialLocalizer {
    geometry: StripGeometry,
    config: LocalizerConfig,
}

impl FiducialLocalizer {
    #[must_use]
    pub const fn new(geometry: StripGeometry, config: LocalizerConfig) -> Self {
        Self { geometry, config }
    }

    #[must_use]
    pub const fn geometry(&self) -> &StripGeometry {
        &self.geometry
    }

    /// Find the best pose hypothesis, or `None` if no combination is valid
    #[must_use]
    pub fn localize(&self, set: &FiducialSet, image_width: u32, image_height: u32) -> Option<LocalizerSolution> {
        let observed: Vec<Correspondence> = set.populated().map(|(role, d)| (role, d.center())).collect();
        let orientations: Vec<Option<f64>> = (0..set.role_count())
            .map(|role| set.get(role).and_then(|d| d.orientation_degrees).map(f64::from))
            .collect();

        let size = match self.config.mode {
            LocalizerMode::Pair => 2,
            LocalizerMode::Triple => 3,
        };
        if observed.len() < size {
            return None;
        }

        let mut best: Option<Candidate> = None;
        for combination in combinations(observed.len(), size) {
            let Some(candidate) = self.evaluate(&combination, &observed, &orientations) else {
                continue;
            };
            if candidate.error > self.config.max_error {
                debug!(
                    "Combination {:?} rejected: error {:.3} above {:.3}",
                    candidate.roles, candidate.error, self.config.max_error
                );
                continue;
            }
            let better = best.as_ref().map_or(true, |b| {
                candidate.error < b.error - EPSILON
                    || ((candidate.error - b.error).abs() <= EPSILON && candidate.span > b.span)
            });
            if better {
                best = Some(candidate);
            }
        }

        best.map(|candidate| self.solution(candidate, image_width, image_height))
    }

    fn evaluate(
        &self,
        combination: &[usize],
        observed: &[Correspondence],
        orientations: &[Option<f64>],
    ) -> Option<Candidate> {
        let roles: Vec<usize> = combination.iter().map(|&i| observed[i].0).collect();
        let points: Vec<Point2<f64>> = combination.iter().map(|&i| observed[i].1).collect();
        let offsets: Vec<f64> = roles.iter().map(|&r| self.geometry.roles()[r].offset).collect();

        // Lines from the reference role to each other role
        let mut angles = Vec::with_capacity(points.len() - 1);
        let mut scales = Vec::with_capacity(points.len() - 1);
        for j in 1..points.len() {
            let line = points[j] - points[0];
            let canonical = offsets[j] - offsets[0];
            if line.norm() < EPSILON || canonical < EPSILON {
                return None;
            }
            angles.push(line.y.atan2(line.x).to_degrees());
            scales.push(line.norm() / canonical);
        }
        let rotation_degrees = circular_mean_degrees(&angles);

        for &role in &roles {
            if let Some(orientation) = orientations[role] {
                if angle_difference_degrees(rotation_degrees, orientation) > self.config.max_orientation_deviation_deg {
                    debug!("Combination {roles:?} rejected: axis {rotation_degrees:.1} vs orientation {orientation:.1}");
                    return None;
                }
            }
        }

        let scale = if let [s1, s2] = scales[..] {
            let ratio = s1 / s2;
            let bound = self.config.max_scale_disparity;
            if !(1.0 - bound..=1.0 + bound).contains(&ratio) {
                debug!("Combination {roles:?} rejected: scale ratio {ratio:.3}");
                return None;
            }
            (s1 * s2).sqrt()
        } else {
            scales[0]
        };
        if !scale.is_finite() || scale < EPSILON {
            return None;
        }

        // Local frame centred on the outermost pair, axis along +x, strip units
        let last = points.len() - 1;
        let image_mid = Point2::from((points[0].coords + points[last].coords) / 2.0);
        let canonical_mid = (offsets[0] + offsets[last]) / 2.0;
        let normalize = Transform2D::translation(-image_mid.x, -image_mid.y)
            .then(&Transform2D::rotation_degrees(-rotation_degrees))
            .then(&Transform2D::scale(1.0 / scale, 1.0 / scale));
        let residual = |role: usize, point: Point2<f64>| {
            let local = normalize.apply(point);
            let reference = Point2::new(self.geometry.roles()[role].offset - canonical_mid, 0.0);
            (local - reference).norm()
        };

        let error = match self.config.mode {
            LocalizerMode::Triple => {
                roles.iter().zip(&points).map(|(&r, &p)| residual(r, p)).sum::<f64>() / roles.len() as f64
            }
            LocalizerMode::Pair => {
                let others: Vec<f64> = observed
                    .iter()
                    .filter(|(role, _)| !roles.contains(role))
                    .map(|&(role, point)| residual(role, point))
                    .collect();
                lower_median(others)
            }
        };

        Some(Candidate {
            span: offsets[last] - offsets[0],
            roles,
            points,
            scale,
            rotation_degrees,
            error,
        })
    }

    fn solution(&self, candidate: Candidate, image_width: u32, image_height: u32) -> LocalizerSolution {
        let (sin, cos) = candidate.rotation_degrees.to_radians().sin_cos();
        let axis = Vector2::new(cos, sin);
        let half_length = self.geometry.length() / 2.0;

        // Each landmark predicts the strip centre; average the predictions
        let center = candidate
            .roles
            .iter()
            .zip(&candidate.points)
            .map(|(&role, point)| {
                let offset = self.geometry.roles()[role].offset;
                point.coords + axis * (candidate.scale * (half_length - offset))
            })
            .sum::<Vector2<f64>>()
            / candidate.roles.len() as f64;

        let footprint = RotatedRect {
            center: [center.x, center.y],
            length: self.geometry.length() * candidate.scale,
            width: self.geometry.width() * candidate.scale,
            angle_degrees: candidate.rotation_degrees,
        };
        let footprint_bounds = self
            .grow_minor_axis(footprint.bounding_rect())
            .clamp_to(image_width, image_height);

        let last = candidate.roles.len() - 1;
        LocalizerSolution {
            correspondences: [
                (candidate.roles[0], candidate.points[0]),
                (candidate.roles[last], candidate.points[last]),
            ],
            roles: candidate.roles,
            scale: candidate.scale,
            rotation_degrees: candidate.rotation_degrees,
            error: candidate.error,
            footprint,
            footprint_bounds,
        }
    }

    /// Widen thin bounds across the strip so the whole strip fits
    #[allow(clippy::cast_possible_truncation)] // Growth is a fraction of an i32 side
    fn grow_minor_axis(&self, mut rect: PixelRect) -> PixelRect {
        let horizontal = rect.width >= rect.height;
        let (major, minor) = if horizontal {
            (rect.width, rect.height)
        } else {
            (rect.height, rect.width)
        };
        if major <= 0 {
            return rect;
        }

        let growth = self.config.growth_factor;
        let ratio = f64::from(minor) / f64::from(major);
        if ratio < (1.0 + growth) * self.geometry.aspect() {
            let adder = (f64::from(minor) * growth).round() as i32;
            if horizontal {
                rect.y -= adder / 2;
                rect.height += adder;
            } else {
                rect.x -= adder / 2;
                rect.width += adder;
            }
        }
        rect
    }
}

/// Increasing index combinations of `size` (2 or 3) out of `n`
fn combinations(n: usize, size: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            if size == 2 {
                out.push(vec![i, j]);
                continue;
            }
            for k in j + 1..n {
                out.push(vec![i, j, k]);
            }
        }
    }
    out
}

/// Lower median; a single outlier among two values is ignored
fn lower_median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    values[(values.len() - 1) / 2]
}
