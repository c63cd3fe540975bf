//! Single-pass preparation of a feature before it is written.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::feature::Feature;
use crate::geometry::{ImplicitGeometry, ImplicitGeometryValue};
use crate::ids::{ObjectId, QualifiedName};

/// Namespaces in which LOD 4 geometry is a legacy encoding.
const LEGACY_LOD4_NAMESPACES: &[&str] = &["bldg", "brid", "tun"];

/// Namespaces that are deprecated altogether.
const DEPRECATED_NAMESPACES: &[&str] = &["tex"];

/// A deprecated geometry encoding seen in the input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeprecatedEncoding {
    /// LOD 4 geometry within a namespace that folds LOD 4 into LOD 3.
    Lod4Geometry { property: QualifiedName },
    /// A property from a deprecated namespace.
    DeprecatedNamespace { namespace: String },
}

/// Visitor collecting deprecated encodings and implicit geometry templates.
///
/// One instance may be reused across features; call [`Preprocessor::clear`]
/// between unrelated inputs.
#[derive(Debug, Default)]
pub struct Preprocessor {
    deprecated: BTreeSet<DeprecatedEncoding>,
    implicit_geometries: HashMap<ObjectId, Arc<ImplicitGeometry>>,
}

impl Preprocessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks the feature and its inline children once.
    pub fn process(&mut self, feature: &Feature) {
        for property in &feature.geometries {
            self.check_encoding(&property.name, property.lod.as_deref());
        }

        for property in &feature.implicit_geometries {
            self.check_encoding(&property.name, property.lod.as_deref());
            if let ImplicitGeometryValue::Inline(template) = &property.value {
                self.implicit_geometries
                    .entry(template.object_id.clone())
                    .or_insert_with(|| Arc::clone(template));
            }
        }

        for child in feature.child_features() {
            self.process(child);
        }
    }

    fn check_encoding(&mut self, property: &QualifiedName, lod: Option<&str>) {
        if lod == Some("4") && LEGACY_LOD4_NAMESPACES.contains(&property.namespace.as_str()) {
            self.flag(DeprecatedEncoding::Lod4Geometry {
                property: property.clone(),
            });
        }
        if DEPRECATED_NAMESPACES.contains(&property.namespace.as_str()) {
            self.flag(DeprecatedEncoding::DeprecatedNamespace {
                namespace: property.namespace.clone(),
            });
        }
    }

    fn flag(&mut self, encoding: DeprecatedEncoding) {
        if !self.deprecated.contains(&encoding) {
            debug!(?encoding, "deprecated geometry encoding");
            self.deprecated.insert(encoding);
        }
    }

    /// Deprecated encodings seen since the last [`clear`](Self::clear).
    #[must_use]
    pub fn deprecated(&self) -> &BTreeSet<DeprecatedEncoding> {
        &self.deprecated
    }

    /// Template with the given object id, if one was seen inline.
    #[must_use]
    pub fn implicit_geometry(&self, object_id: &ObjectId) -> Option<&Arc<ImplicitGeometry>> {
        self.implicit_geometries.get(object_id)
    }

    #[must_use]
    pub fn implicit_geometries(&self) -> &HashMap<ObjectId, Arc<ImplicitGeometry>> {
        &self.implicit_geometries
    }

    pub fn clear(&mut self) {
        self.deprecated.clear();
        self.implicit_geometries.clear();
    }
}
