//! The shape model.
//!
//! A [`Shape`] is a shared envelope (id, style, audit and lock fields) around a
//! type-specific [`ShapeBody`]. On the wire every shape is one flat key/value
//! record (see [`Shape::to_record`]) so each shape is its own store document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shapesync_geometry::{Bounds, Point, RelativeTransform};

use crate::error::ValidationError;
use crate::ids::{ShapeId, UserId};
use crate::time::Timestamp;

/// Flat key/value form of a store document
pub type Fields = Map<String, Value>;

/// The shape variants a canvas can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rectangle,
    Circle,
    Line,
    Text,
}

impl ShapeKind {
    pub fn name(self) -> &'static str {
        match self {
            ShapeKind::Rectangle => "rectangle",
            ShapeKind::Circle => "circle",
            ShapeKind::Line => "line",
            ShapeKind::Text => "text",
        }
    }

    /// Geometry fields a patch may set on this kind
    fn geometry_fields(self) -> &'static [&'static str] {
        match self {
            ShapeKind::Rectangle | ShapeKind::Circle => &["x", "y", "width", "height"],
            ShapeKind::Line => &["points"],
            ShapeKind::Text => &["x", "y", "width", "height", "text", "fontSize"],
        }
    }
}

impl std::fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Type-specific geometry, tagged by `type` in the flat record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeBody {
    /// Axis-aligned box at (x, y), rotated by the style's rotation
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Ellipse inscribed in its frame
    Circle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Polyline through two or more points
    Line { points: Vec<Point> },
    /// Text block
    Text {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        text: String,
        #[serde(rename = "fontSize", default = "default_font_size")]
        font_size: f64,
    },
}

fn default_font_size() -> f64 {
    16.0
}

impl ShapeBody {
    pub fn kind(&self) -> ShapeKind {
        match self {
            ShapeBody::Rectangle { .. } => ShapeKind::Rectangle,
            ShapeBody::Circle { .. } => ShapeKind::Circle,
            ShapeBody::Line { .. } => ShapeKind::Line,
            ShapeBody::Text { .. } => ShapeKind::Text,
        }
    }

    /// Anchor position: the frame origin, or the first point of a line
    pub fn position(&self) -> Point {
        match self {
            ShapeBody::Rectangle { x, y, .. }
            | ShapeBody::Circle { x, y, .. }
            | ShapeBody::Text { x, y, .. } => Point::new(*x, *y),
            ShapeBody::Line { points } => points.first().copied().unwrap_or_default(),
        }
    }

    /// Frame of the shape (for lines, the bounds of its points)
    pub fn bounds(&self) -> Bounds {
        match self {
            ShapeBody::Rectangle { x, y, width, height }
            | ShapeBody::Circle { x, y, width, height }
            | ShapeBody::Text { x, y, width, height, .. } => Bounds::new(*x, *y, *width, *height),
            ShapeBody::Line { points } => Bounds::of_points(points).unwrap_or_default(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ShapeBody::Rectangle { x, y, width, height } | ShapeBody::Circle { x, y, width, height } => {
                validate_frame(*x, *y, *width, *height)
            }
            ShapeBody::Line { points } => {
                if points.len() < 2 {
                    return Err(ValidationError::TooFewPoints(points.len()));
                }
                if points.iter().any(|p| !p.is_finite()) {
                    return Err(ValidationError::NonFinite("points"));
                }
                Ok(())
            }
            ShapeBody::Text { x, y, width, height, text, font_size } => {
                validate_frame(*x, *y, *width, *height)?;
                if text.trim().is_empty() {
                    return Err(ValidationError::EmptyText);
                }
                non_negative("fontSize", *font_size)
            }
        }
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() { Ok(()) } else { Err(ValidationError::NonFinite(field)) }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::Negative { field, value });
    }
    Ok(())
}

fn validate_frame(x: f64, y: f64, width: f64, height: f64) -> Result<(), ValidationError> {
    finite("x", x)?;
    finite("y", y)?;
    non_negative("width", width)?;
    non_negative("height", height)
}

/// Visual style shared by every kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Degrees, clockwise
    #[serde(default)]
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corner_radius: Option<f64>,
}

fn default_stroke_width() -> f64 {
    1.0
}

fn default_opacity() -> f64 {
    1.0
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            fill: None,
            stroke: None,
            stroke_width: default_stroke_width(),
            opacity: default_opacity(),
            rotation: 0.0,
            corner_radius: None,
        }
    }
}

impl ShapeStyle {
    fn validate(&self) -> Result<(), ValidationError> {
        non_negative("strokeWidth", self.stroke_width)?;
        finite("opacity", self.opacity)?;
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ValidationError::OpacityOutOfRange(self.opacity));
        }
        finite("rotation", self.rotation)?;
        if let Some(radius) = self.corner_radius {
            non_negative("cornerRadius", radius)?;
        }
        Ok(())
    }
}

/// Who created and last touched a shape, and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub last_modified_by: UserId,
    pub last_modified_at: Timestamp,
}

/// Lock columns of a shape record. `is_locked` is true iff `locked_by` is set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFields {
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub locked_by: Option<UserId>,
    #[serde(default)]
    pub locked_at: Option<Timestamp>,
}

impl LockFields {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn held_by(user: UserId, at: Timestamp) -> Self {
        Self {
            is_locked: true,
            locked_by: Some(user),
            locked_at: Some(at),
        }
    }

    pub fn holder(&self) -> Option<&UserId> {
        if self.is_locked { self.locked_by.as_ref() } else { None }
    }

    /// Partial record that writes exactly these lock columns
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("isLocked".into(), Value::Bool(self.is_locked));
        fields.insert(
            "lockedBy".into(),
            self.locked_by
                .as_ref()
                .map_or(Value::Null, |u| Value::String(u.0.clone())),
        );
        fields.insert("lockedAt".into(), self.locked_at.map_or(Value::Null, Value::from));
        fields
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match (self.is_locked, self.locked_by.is_some()) {
            (true, false) => Err(ValidationError::LockInconsistent { is_locked: true, holder: "null" }),
            (false, true) => Err(ValidationError::LockInconsistent { is_locked: false, holder: "set" }),
            _ => Ok(()),
        }
    }
}

/// Caller-supplied part of a shape, before the store assigns system fields
#[derive(Debug, Clone, PartialEq)]
pub struct NewShape {
    /// Optional caller-chosen id; generated when absent
    pub id: Option<ShapeId>,
    pub body: ShapeBody,
    pub style: ShapeStyle,
}

impl NewShape {
    pub fn new(body: ShapeBody) -> Self {
        Self {
            id: None,
            body,
            style: ShapeStyle::default(),
        }
    }

    pub fn with_id(mut self, id: ShapeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_style(mut self, style: ShapeStyle) -> Self {
        self.style = style;
        self
    }

    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(ShapeBody::Rectangle { x, y, width, height })
    }

    pub fn circle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(ShapeBody::Circle { x, y, width, height })
    }

    pub fn line(points: Vec<Point>) -> Self {
        Self::new(ShapeBody::Line { points })
    }

    pub fn text(x: f64, y: f64, text: impl Into<String>) -> Self {
        Self::new(ShapeBody::Text {
            x,
            y,
            width: 200.0,
            height: 24.0,
            text: text.into(),
            font_size: default_font_size(),
        })
    }
}

/// A shape document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: ShapeId,
    #[serde(flatten)]
    pub body: ShapeBody,
    #[serde(flatten)]
    pub style: ShapeStyle,
    #[serde(flatten)]
    pub audit: Audit,
    #[serde(flatten)]
    pub lock: LockFields,
}

impl Shape {
    /// Fill in system fields for a newly created shape
    pub fn create(draft: NewShape, by: &UserId, now: Timestamp) -> Self {
        Self {
            id: draft.id.unwrap_or_default(),
            body: draft.body,
            style: draft.style,
            audit: Audit {
                created_by: by.clone(),
                created_at: now,
                last_modified_by: by.clone(),
                last_modified_at: now,
            },
            lock: LockFields::unlocked(),
        }
    }

    pub fn kind(&self) -> ShapeKind {
        self.body.kind()
    }

    pub fn position(&self) -> Point {
        self.body.position()
    }

    pub fn lock_holder(&self) -> Option<&UserId> {
        self.lock.holder()
    }

    /// Locked by someone other than `user`
    pub fn is_locked_by_other(&self, user: &UserId) -> bool {
        self.lock_holder().is_some_and(|holder| holder != user)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        self.body.validate()?;
        self.style.validate()?;
        self.lock.validate()
    }

    /// Flat record form (camelCase keys, `type` tag)
    pub fn to_record(&self) -> Result<Fields, ValidationError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ValidationError::Record(format!("expected an object, got {other}"))),
            Err(e) => Err(ValidationError::Record(e.to_string())),
        }
    }

    /// Parse and validate a flat record
    pub fn from_record(fields: &Fields) -> Result<Self, ValidationError> {
        let shape: Shape = serde_json::from_value(Value::Object(fields.clone()))
            .map_err(|e| ValidationError::Record(e.to_string()))?;
        shape.validate()?;
        Ok(shape)
    }

    /// Copy with `patch` applied and the audit fields bumped
    pub fn patched(&self, patch: &ShapePatch, by: &UserId, now: Timestamp) -> Result<Self, ValidationError> {
        patch.check_applies_to(self.kind())?;
        let mut record = self.to_record()?;
        record.extend(patch.to_fields());
        record.insert("lastModifiedBy".into(), Value::String(by.0.clone()));
        record.insert("lastModifiedAt".into(), Value::from(now));
        Self::from_record(&record)
    }

    /// Patch that moves the shape's anchor to `to`, keeping its size
    pub fn move_to_patch(&self, to: Point) -> ShapePatch {
        match &self.body {
            ShapeBody::Line { points } => {
                let from = self.position();
                ShapePatch {
                    points: Some(points.iter().map(|p| p.translated(to.x - from.x, to.y - from.y)).collect()),
                    ..ShapePatch::default()
                }
            }
            _ => ShapePatch {
                x: Some(to.x),
                y: Some(to.y),
                ..ShapePatch::default()
            },
        }
    }

    /// Resolve a relative transform against this shape's current geometry
    pub fn transform_patch(&self, transform: &RelativeTransform) -> Result<ShapePatch, ValidationError> {
        if !transform.is_valid() {
            return Err(ValidationError::InvalidTransform);
        }
        let rotation = (transform.delta_rotation != 0.0)
            .then(|| transform.apply_to_rotation(self.style.rotation));
        let patch = match &self.body {
            ShapeBody::Line { points } => ShapePatch {
                points: Some(transform.apply_to_points(points)),
                rotation,
                ..ShapePatch::default()
            },
            body => {
                let b = transform.apply_to_bounds(body.bounds());
                ShapePatch {
                    x: Some(b.x),
                    y: Some(b.y),
                    width: Some(b.width),
                    height: Some(b.height),
                    rotation,
                    ..ShapePatch::default()
                }
            }
        };
        Ok(patch)
    }
}

/// Partial update of a shape's geometry and style.
///
/// Identity, audit and lock fields are not part of a patch; they are written
/// by the repository and the lock manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corner_radius: Option<f64>,
}

impl ShapePatch {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_fields().is_empty()
    }

    /// Only the fields this patch sets
    pub fn to_fields(&self) -> Fields {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Fields::new(),
        }
    }

    /// Reject geometry fields that the target kind does not have
    pub fn check_applies_to(&self, kind: ShapeKind) -> Result<(), ValidationError> {
        const GEOMETRY: [&str; 7] = ["x", "y", "width", "height", "points", "text", "fontSize"];
        for key in self.to_fields().keys() {
            if let Some(field) = GEOMETRY.iter().copied().find(|g| *g == key.as_str()) {
                if !kind.geometry_fields().contains(&field) {
                    return Err(ValidationError::FieldNotApplicable { field, kind });
                }
            }
        }
        Ok(())
    }
}
