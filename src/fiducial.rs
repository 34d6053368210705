//! Fiducial roles on the strip and per-frame role assignment.

use crate::config::StripConfig;
use crate::detection::Detection;
use nalgebra::Point2;

/// Named marking at a known offset along the strip axis
#[derive(Debug, Clone, PartialEq)]
pub struct FiducialRole {
    pub label: String,
    pub offset: f64,
}

/// Canonical strip geometry in strip units.
///
/// The canonical frame has `x` across the strip (`0..width`) and `y` along
/// it (`0..length`). Fiducials sit on the centre line `x = width / 2`.
/// Roles are kept sorted by offset so role indices follow the strip axis.
#[derive(Debug, Clone)]
pub struct StripGeometry {
    roles: Vec<FiducialRole>,
    length: f64,
    width: f64,
    window_top: f64,
    window_bottom: f64,
}

impl StripGeometry {
    #[must_use]
    pub fn from_config(config: &StripConfig) -> Self {
        let mut roles: Vec<FiducialRole> = config
            .fiducials
            .iter()
            .map(|f| FiducialRole {
                label: f.label.clone(),
                offset: f.offset,
            })
            .collect();
        roles.sort_by(|a, b| a.offset.total_cmp(&b.offset));

        Self {
            roles,
            length: config.length,
            width: config.width,
            window_top: config.window_top,
            window_bottom: config.window_bottom,
        }
    }

    /// Roles in ascending offset order
    #[must_use]
    pub fn roles(&self) -> &[FiducialRole] {
        &self.roles
    }

    /// Role index for a detector label (case-insensitive)
    #[must_use]
    pub fn role_index(&self, label: &str) -> Option<usize> {
        self.roles.iter().position(|r| r.label.eq_ignore_ascii_case(label))
    }

    #[must_use]
    pub const fn length(&self) -> f64 {
        self.length
    }

    #[must_use]
    pub const fn width(&self) -> f64 {
        self.width
    }

    /// Result window band `(top, bottom)` along the axis
    #[must_use]
    pub const fn window_band(&self) -> (f64, f64) {
        (self.window_top, self.window_bottom)
    }

    /// Width over length
    #[must_use]
    pub fn aspect(&self) -> f64 {
        self.width / self.length
    }

    /// Canonical position of a role's marking
    #[must_use]
    pub fn canonical_point(&self, role: usize) -> Option<Point2<f64>> {
        self.roles.get(role).map(|r| Point2::new(self.width / 2.0, r.offset))
    }
}

/// Best detection per role for one frame; unobserved roles are `None`
#[derive(Debug, Clone, PartialEq)]
pub struct FiducialSet {
    slots: Vec<Option<Detection>>,
}

impl FiducialSet {
    /// Assign detections to roles, keeping the most confident per role
    #[must_use]
    pub fn from_detections(geometry: &StripGeometry, detections: &[Detection]) -> Self {
        let mut slots: Vec<Option<Detection>> = vec![None; geometry.roles().len()];
        for detection in detections {
            let Some(role) = geometry.role_index(&detection.label) else {
                continue;
            };
            let replace = slots[role]
                .as_ref()
                .map_or(true, |current| detection.confidence > current.confidence);
            if replace {
                slots[role] = Some(detection.clone());
            }
        }
        Self { slots }
    }

    /// Detection for a role
    #[must_use]
    pub fn get(&self, role: usize) -> Option<&Detection> {
        self.slots.get(role).and_then(Option::as_ref)
    }

    /// Populated roles in axis order
    pub fn populated(&self) -> impl Iterator<Item = (usize, &Detection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|d| (i, d)))
    }

    /// Number of populated roles
    #[must_use]
    pub fn populated_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Number of roles, populated or not
    #[must_use]
    pub fn role_count(&self) -> usize {
        self.slots.len()
    }
}
