//! Geometry values and geometry properties.
//!
//! Geometries are treated as opaque typed coordinate data: a geometry type
//! plus nested arrays of 2D or 3D positions. The only spatial operation the
//! crate performs is envelope computation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

use crate::error::{ModelError, ModelResult};
use crate::ids::{ObjectId, QualifiedName};

/// Geometry type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    MultiSurface,
    Solid,
    Envelope,
}

impl GeometryType {
    /// Number of array levels above a single position.
    #[must_use]
    pub const fn nesting(&self) -> usize {
        match self {
            Self::Point => 0,
            Self::MultiPoint | Self::LineString | Self::Envelope => 1,
            Self::MultiLineString | Self::Polygon => 2,
            Self::MultiPolygon | Self::MultiSurface => 3,
            Self::Solid => 4,
        }
    }

    /// Type name as stored in the `geometry_data` table.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::MultiPoint => "MultiPoint",
            Self::LineString => "LineString",
            Self::MultiLineString => "MultiLineString",
            Self::Polygon => "Polygon",
            Self::MultiPolygon => "MultiPolygon",
            Self::MultiSurface => "MultiSurface",
            Self::Solid => "Solid",
            Self::Envelope => "Envelope",
        }
    }

    /// Case-insensitive lookup by type name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "point" => Self::Point,
            "multipoint" => Self::MultiPoint,
            "linestring" => Self::LineString,
            "multilinestring" => Self::MultiLineString,
            "polygon" => Self::Polygon,
            "multipolygon" => Self::MultiPolygon,
            "multisurface" => Self::MultiSurface,
            "solid" => Self::Solid,
            "envelope" | "bbox" => Self::Envelope,
            _ => return None,
        };
        Some(kind)
    }
}

/// Axis-aligned bounding box. 2D positions contribute `z = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Envelope {
    #[must_use]
    pub const fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    fn from_position(position: [f64; 3]) -> Self {
        Self {
            min: position,
            max: position,
        }
    }

    /// Grows this envelope to include `other`.
    pub fn merge(&mut self, other: &Envelope) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    /// Merges two optional envelopes.
    #[must_use]
    pub fn union(a: Option<Envelope>, b: Option<Envelope>) -> Option<Envelope> {
        match (a, b) {
            (Some(mut a), Some(b)) => {
                a.merge(&b);
                Some(a)
            }
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// 2D overlap test (x/y only).
    #[must_use]
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min[0] <= other.max[0]
            && self.max[0] >= other.min[0]
            && self.min[1] <= other.max[1]
            && self.max[1] >= other.min[1]
    }

    /// Translates the envelope by `offset`.
    #[must_use]
    pub fn translated(&self, offset: [f64; 3]) -> Envelope {
        let mut moved = *self;
        for axis in 0..3 {
            moved.min[axis] += offset[axis];
            moved.max[axis] += offset[axis];
        }
        moved
    }
}

/// Typed geometry value with coordinates stored as nested position arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<ObjectId>,
    #[serde(rename = "type")]
    pub kind: GeometryType,
    pub coordinates: JsonValue,
}

impl Geometry {
    /// Validates the coordinate nesting for `kind` and normalises every
    /// ordinate to a floating point JSON number.
    pub fn new(kind: GeometryType, coordinates: &JsonValue) -> ModelResult<Self> {
        let coordinates = normalize(coordinates, kind.nesting())?;
        Ok(Self {
            object_id: None,
            kind,
            coordinates,
        })
    }

    #[must_use]
    pub fn point(position: [f64; 3]) -> Self {
        Self {
            object_id: None,
            kind: GeometryType::Point,
            coordinates: position_json(&position),
        }
    }

    #[must_use]
    pub fn line_string(positions: &[[f64; 3]]) -> Self {
        Self {
            object_id: None,
            kind: GeometryType::LineString,
            coordinates: positions_json(positions),
        }
    }

    #[must_use]
    pub fn polygon(rings: &[Vec<[f64; 3]>]) -> Self {
        Self {
            object_id: None,
            kind: GeometryType::Polygon,
            coordinates: JsonValue::Array(rings.iter().map(|r| positions_json(r)).collect()),
        }
    }

    /// A multi-surface made of single-ring polygons.
    #[must_use]
    pub fn multi_surface(polygons: &[Vec<[f64; 3]>]) -> Self {
        let coordinates = polygons
            .iter()
            .map(|ring| JsonValue::Array(vec![positions_json(ring)]))
            .collect();
        Self {
            object_id: None,
            kind: GeometryType::MultiSurface,
            coordinates: JsonValue::Array(coordinates),
        }
    }

    /// An envelope geometry spanning `min`..`max`.
    #[must_use]
    pub fn envelope_of(min: [f64; 3], max: [f64; 3]) -> Self {
        Self {
            object_id: None,
            kind: GeometryType::Envelope,
            coordinates: positions_json(&[min, max]),
        }
    }

    #[must_use]
    pub fn with_object_id(mut self, object_id: impl Into<ObjectId>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    /// Bounding box of all positions, or `None` for an empty geometry.
    #[must_use]
    pub fn envelope(&self) -> Option<Envelope> {
        let mut envelope = None;
        collect_envelope(&self.coordinates, &mut envelope);
        envelope
    }
}

fn position_json(position: &[f64]) -> JsonValue {
    JsonValue::Array(
        position
            .iter()
            .map(|v| Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number))
            .collect(),
    )
}

fn positions_json(positions: &[[f64; 3]]) -> JsonValue {
    JsonValue::Array(positions.iter().map(|p| position_json(p)).collect())
}

fn normalize(value: &JsonValue, depth: usize) -> ModelResult<JsonValue> {
    let items = value
        .as_array()
        .ok_or_else(|| ModelError::InvalidGeometry(format!("expected array, found {value}")))?;

    if depth == 0 {
        if !(2..=3).contains(&items.len()) {
            return Err(ModelError::InvalidGeometry(format!(
                "position must have 2 or 3 ordinates, found {}",
                items.len()
            )));
        }
        let ordinates = items
            .iter()
            .map(|item| {
                item.as_f64()
                    .and_then(Number::from_f64)
                    .map(JsonValue::Number)
                    .ok_or_else(|| {
                        ModelError::InvalidGeometry(format!("ordinate `{item}` is not a finite number"))
                    })
            })
            .collect::<ModelResult<Vec<_>>>()?;
        return Ok(JsonValue::Array(ordinates));
    }

    items
        .iter()
        .map(|item| normalize(item, depth - 1))
        .collect::<ModelResult<Vec<_>>>()
        .map(JsonValue::Array)
}

fn collect_envelope(value: &JsonValue, envelope: &mut Option<Envelope>) {
    let JsonValue::Array(items) = value else {
        return;
    };

    if items.iter().all(JsonValue::is_number) && (2..=3).contains(&items.len()) {
        let mut position = [0.0; 3];
        for (axis, item) in items.iter().enumerate() {
            position[axis] = item.as_f64().unwrap_or_default();
        }
        let point = Envelope::from_position(position);
        *envelope = Envelope::union(*envelope, Some(point));
        return;
    }

    for item in items {
        collect_envelope(item, envelope);
    }
}

/// Either an inline geometry or a reference to a shared geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryValue {
    Inline(Geometry),
    Reference(ObjectId),
}

/// A geometry-valued property tagged with its level of detail.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryProperty {
    pub name: QualifiedName,
    pub lod: Option<String>,
    pub value: GeometryValue,
}

impl GeometryProperty {
    /// Inline geometry property.
    #[must_use]
    pub fn inline(name: QualifiedName, lod: Option<&str>, geometry: Geometry) -> Self {
        Self {
            name,
            lod: lod.map(str::to_string),
            value: GeometryValue::Inline(geometry),
        }
    }

    /// Property referencing a geometry defined elsewhere in the dataset.
    #[must_use]
    pub fn reference(name: QualifiedName, lod: Option<&str>, target: impl Into<ObjectId>) -> Self {
        Self {
            name,
            lod: lod.map(str::to_string),
            value: GeometryValue::Reference(target.into()),
        }
    }
}

/// Reusable geometry template.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitGeometry {
    pub object_id: ObjectId,
    pub mime_type: Option<String>,
    pub library_object: Option<String>,
    pub geometry: Option<Geometry>,
}

impl ImplicitGeometry {
    #[must_use]
    pub fn new(object_id: impl Into<ObjectId>, geometry: Option<Geometry>) -> Self {
        Self {
            object_id: object_id.into(),
            mime_type: None,
            library_object: None,
            geometry,
        }
    }
}

/// Inline template or a reference to one by object id.
#[derive(Debug, Clone, PartialEq)]
pub enum ImplicitGeometryValue {
    Inline(Arc<ImplicitGeometry>),
    Reference(ObjectId),
}

impl ImplicitGeometryValue {
    /// Object id of the referenced template.
    #[must_use]
    pub fn object_id(&self) -> &ObjectId {
        match self {
            Self::Inline(template) => &template.object_id,
            Self::Reference(object_id) => object_id,
        }
    }
}

/// Placement of an implicit geometry template on a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitGeometryProperty {
    pub name: QualifiedName,
    pub lod: Option<String>,
    /// Row-major 4x4 transformation matrix.
    pub transformation: Option<[f64; 16]>,
    pub reference_point: Option<[f64; 3]>,
    pub value: ImplicitGeometryValue,
}

impl ImplicitGeometryProperty {
    #[must_use]
    pub fn new(name: QualifiedName, lod: Option<&str>, value: ImplicitGeometryValue) -> Self {
        Self {
            name,
            lod: lod.map(str::to_string),
            transformation: None,
            reference_point: None,
            value,
        }
    }

    #[must_use]
    pub fn with_reference_point(mut self, point: [f64; 3]) -> Self {
        self.reference_point = Some(point);
        self
    }

    #[must_use]
    pub fn with_transformation(mut self, matrix: [f64; 16]) -> Self {
        self.transformation = Some(matrix);
        self
    }

    /// Envelope of the placed template, translated to the reference point.
    #[must_use]
    pub fn envelope(&self) -> Option<Envelope> {
        let origin = self.reference_point?;
        let template = match &self.value {
            ImplicitGeometryValue::Inline(template) => template
                .geometry
                .as_ref()
                .and_then(Geometry::envelope)
                .map(|envelope| envelope.translated(origin)),
            ImplicitGeometryValue::Reference(_) => None,
        };
        Envelope::union(template, Some(Envelope::from_position(origin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_normalises_integer_ordinates() {
        let geometry = Geometry::new(GeometryType::LineString, &json!([[0, 0], [1, 2]])).unwrap();
        assert_eq!(
            geometry,
            Geometry::new(GeometryType::LineString, &json!([[0.0, 0.0], [1.0, 2.0]])).unwrap()
        );
    }

    #[test]
    fn new_rejects_wrong_nesting() {
        let err = Geometry::new(GeometryType::Polygon, &json!([[0, 0], [1, 1]])).unwrap_err();
        assert!(matches!(err, ModelError::InvalidGeometry(_)));
    }

    #[test]
    fn envelope_spans_all_positions() {
        let geometry = Geometry::multi_surface(&[
            vec![[0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [4.0, 2.0, 0.0], [0.0, 0.0, 0.0]],
            vec![[1.0, 1.0, 3.0], [2.0, 5.0, 3.0], [1.0, 1.0, 3.0]],
        ]);
        let envelope = geometry.envelope().unwrap();
        assert_eq!(envelope.min, [0.0, 0.0, 0.0]);
        assert_eq!(envelope.max, [4.0, 5.0, 3.0]);
    }

    #[test]
    fn envelope_overlap_is_two_dimensional() {
        let a = Envelope::new([0.0, 0.0, 0.0], [2.0, 2.0, 0.0]);
        let b = Envelope::new([1.0, 1.0, 100.0], [3.0, 3.0, 200.0]);
        let c = Envelope::new([5.0, 5.0, 0.0], [6.0, 6.0, 0.0]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
