//! Geometry primitives for shapesync.
//!
//! Only the math the sync engine itself needs lives here: points, axis-aligned
//! bounds and the relative transform used by batched moves/resizes. Layout and
//! hit-testing belong to the rendering layer.

use serde::{Deserialize, Serialize};

/// A position on the canvas (can be negative for infinite canvas feel)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Create a translated copy of this point
    pub fn translated(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Smallest bounds containing every point, or `None` for an empty slice
    pub fn of_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A move/rotate/scale applied relative to each target's current geometry.
///
/// The store has no server-side increment, so callers resolve the transform
/// against every shape individually before submitting a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelativeTransform {
    #[serde(default)]
    pub delta_x: f64,
    #[serde(default)]
    pub delta_y: f64,
    #[serde(default)]
    pub delta_rotation: f64,
    #[serde(default = "unit_scale")]
    pub scale_x: f64,
    #[serde(default = "unit_scale")]
    pub scale_y: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl Default for RelativeTransform {
    fn default() -> Self {
        Self {
            delta_x: 0.0,
            delta_y: 0.0,
            delta_rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

impl RelativeTransform {
    /// Pure translation
    pub fn translate(dx: f64, dy: f64) -> Self {
        Self {
            delta_x: dx,
            delta_y: dy,
            ..Self::default()
        }
    }

    /// Pure scale about each shape's own origin
    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            scale_x: sx,
            scale_y: sy,
            ..Self::default()
        }
    }

    /// Pure rotation in degrees
    pub fn rotate(degrees: f64) -> Self {
        Self {
            delta_rotation: degrees,
            ..Self::default()
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Every component finite and both scale factors strictly positive
    pub fn is_valid(&self) -> bool {
        [self.delta_x, self.delta_y, self.delta_rotation, self.scale_x, self.scale_y]
            .iter()
            .all(|v| v.is_finite())
            && self.scale_x > 0.0
            && self.scale_y > 0.0
    }

    /// Apply to a frame-based shape (origin + size)
    pub fn apply_to_bounds(&self, bounds: Bounds) -> Bounds {
        Bounds {
            x: bounds.x + self.delta_x,
            y: bounds.y + self.delta_y,
            width: bounds.width * self.scale_x,
            height: bounds.height * self.scale_y,
        }
    }

    /// Apply to a polyline: scale about the first point, then translate
    pub fn apply_to_points(&self, points: &[Point]) -> Vec<Point> {
        let Some(anchor) = points.first().copied() else {
            return Vec::new();
        };
        points
            .iter()
            .map(|p| {
                Point::new(
                    anchor.x + (p.x - anchor.x) * self.scale_x + self.delta_x,
                    anchor.y + (p.y - anchor.y) * self.scale_y + self.delta_y,
                )
            })
            .collect()
    }

    /// Apply the rotation delta, normalised to [0, 360)
    pub fn apply_to_rotation(&self, rotation: f64) -> f64 {
        normalize_degrees(rotation + self.delta_rotation)
    }
}

/// Wrap an angle in degrees into [0, 360)
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}
