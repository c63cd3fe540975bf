//! Feature object model consumed by the importer and produced by the exporter.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::appearance::{Appearance, AppearanceProperty};
use crate::geometry::{
    Envelope, Geometry, GeometryProperty, GeometryValue, ImplicitGeometryProperty,
};
use crate::ids::{ObjectId, QualifiedName};
use crate::value::Value;

/// Typed, non-spatial property of a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QualifiedName,
    pub value: Value,
}

/// Either a contained child feature or a reference to another feature.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Inline(Box<Feature>),
    Reference(ObjectId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureProperty {
    pub name: QualifiedName,
    pub value: FeatureValue,
}

/// A typed city object with properties, geometries and child features.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub object_id: ObjectId,
    pub feature_type: QualifiedName,
    pub attributes: Vec<Attribute>,
    pub geometries: Vec<GeometryProperty>,
    pub implicit_geometries: Vec<ImplicitGeometryProperty>,
    pub appearances: Vec<AppearanceProperty>,
    pub children: Vec<FeatureProperty>,
    pub lineage: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub termination_date: Option<DateTime<Utc>>,
}

impl Feature {
    /// Creates an empty feature of the given type.
    #[must_use]
    pub fn new(object_id: impl Into<ObjectId>, feature_type: QualifiedName) -> Self {
        Self {
            object_id: object_id.into(),
            feature_type,
            attributes: Vec::new(),
            geometries: Vec::new(),
            implicit_geometries: Vec::new(),
            appearances: Vec::new(),
            children: Vec::new(),
            lineage: None,
            creation_date: None,
            termination_date: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: QualifiedName, value: Value) -> Self {
        self.attributes.push(Attribute { name, value });
        self
    }

    /// Adds an inline geometry property.
    #[must_use]
    pub fn with_geometry(mut self, name: QualifiedName, lod: Option<&str>, geometry: Geometry) -> Self {
        self.geometries
            .push(GeometryProperty::inline(name, lod, geometry));
        self
    }

    #[must_use]
    pub fn with_geometry_property(mut self, property: GeometryProperty) -> Self {
        self.geometries.push(property);
        self
    }

    #[must_use]
    pub fn with_implicit_geometry(mut self, property: ImplicitGeometryProperty) -> Self {
        self.implicit_geometries.push(property);
        self
    }

    #[must_use]
    pub fn with_appearance(mut self, appearance: Arc<Appearance>) -> Self {
        self.appearances.push(AppearanceProperty::inline(appearance));
        self
    }

    #[must_use]
    pub fn with_appearance_property(mut self, property: AppearanceProperty) -> Self {
        self.appearances.push(property);
        self
    }

    /// Adds a contained child feature.
    #[must_use]
    pub fn with_child(mut self, name: QualifiedName, child: Feature) -> Self {
        self.children.push(FeatureProperty {
            name,
            value: FeatureValue::Inline(Box::new(child)),
        });
        self
    }

    /// Adds a reference to another feature by object id.
    #[must_use]
    pub fn with_reference(mut self, name: QualifiedName, target: impl Into<ObjectId>) -> Self {
        self.children.push(FeatureProperty {
            name,
            value: FeatureValue::Reference(target.into()),
        });
        self
    }

    /// First attribute with the given name.
    #[must_use]
    pub fn attribute(&self, name: &QualifiedName) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|attribute| &attribute.name == name)
            .map(|attribute| &attribute.value)
    }

    /// Iterates inline child features.
    pub fn child_features(&self) -> impl Iterator<Item = &Feature> {
        self.children.iter().filter_map(|property| match &property.value {
            FeatureValue::Inline(child) => Some(child.as_ref()),
            FeatureValue::Reference(_) => None,
        })
    }

    /// LOD tags used by this feature's own geometry properties.
    #[must_use]
    pub fn lods(&self) -> BTreeSet<String> {
        self.geometries
            .iter()
            .filter_map(|property| property.lod.clone())
            .chain(
                self.implicit_geometries
                    .iter()
                    .filter_map(|property| property.lod.clone()),
            )
            .collect()
    }

    /// Envelope of own inline geometries, placed implicit geometries and
    /// inline children.
    #[must_use]
    pub fn envelope(&self) -> Option<Envelope> {
        let own = self
            .geometries
            .iter()
            .filter_map(|property| match &property.value {
                GeometryValue::Inline(geometry) => geometry.envelope(),
                GeometryValue::Reference(_) => None,
            })
            .chain(
                self.implicit_geometries
                    .iter()
                    .filter_map(ImplicitGeometryProperty::envelope),
            )
            .fold(None, |acc, envelope| Envelope::union(acc, Some(envelope)));

        self.child_features()
            .map(Feature::envelope)
            .fold(own, Envelope::union)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ImplicitGeometry, ImplicitGeometryValue};

    fn name(local: &str) -> QualifiedName {
        QualifiedName::new("bldg", local)
    }

    #[test]
    fn envelope_includes_children_and_implicit_placements() {
        let template = Arc::new(ImplicitGeometry::new(
            "tree-template",
            Some(Geometry::point([0.0, 0.0, 10.0])),
        ));
        let wall = Feature::new("wall-1", name("WallSurface")).with_geometry(
            name("lod2MultiSurface"),
            Some("2"),
            Geometry::polygon(&[vec![[0.0, 0.0, 0.0], [5.0, 0.0, 0.0], [5.0, 0.0, 3.0]]]),
        );
        let building = Feature::new("b-1", name("Building"))
            .with_child(name("boundary"), wall)
            .with_implicit_geometry(
                ImplicitGeometryProperty::new(
                    name("lod1ImplicitRepresentation"),
                    Some("1"),
                    ImplicitGeometryValue::Inline(template),
                )
                .with_reference_point([-1.0, -1.0, 0.0]),
            );

        let envelope = building.envelope().unwrap();
        assert_eq!(envelope.min, [-1.0, -1.0, 0.0]);
        assert_eq!(envelope.max, [5.0, 0.0, 10.0]);
        assert_eq!(building.lods(), BTreeSet::from(["1".to_string()]));
    }

    #[test]
    fn attribute_lookup_by_name() {
        let feature = Feature::new("b-1", name("Building"))
            .with_attribute(name("storeysAboveGround"), Value::Integer(3));
        assert_eq!(
            feature.attribute(&name("storeysAboveGround")),
            Some(&Value::Integer(3))
        );
        assert_eq!(feature.attribute(&name("roofType")), None);
    }
}
