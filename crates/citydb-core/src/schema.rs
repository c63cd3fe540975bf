//! Schema metadata exposed by a database adapter.
//!
//! Maps filter property references onto the relational layout: columns of
//! the `feature` table, typed rows of the `property` table, geometry
//! properties joined to `geometry_data`, and the feature envelope.

use std::collections::BTreeMap;

use crate::ids::QualifiedName;
use crate::registry::{FeatureTypeRegistry, GENERIC_NAMESPACE};
use crate::value::DataType;

/// Namespace of the columns every feature row carries.
pub const CORE_NAMESPACE: &str = "core";

/// Column of the `feature` table addressable from filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreColumn {
    Id,
    ObjectId,
    ObjectClass,
    Lineage,
    CreationDate,
    TerminationDate,
}

impl CoreColumn {
    const ALL: [CoreColumn; 6] = [
        Self::Id,
        Self::ObjectId,
        Self::ObjectClass,
        Self::Lineage,
        Self::CreationDate,
        Self::TerminationDate,
    ];

    /// Property name used in filters.
    #[must_use]
    pub const fn property_name(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::ObjectId => "objectId",
            Self::ObjectClass => "featureType",
            Self::Lineage => "lineage",
            Self::CreationDate => "creationDate",
            Self::TerminationDate => "terminationDate",
        }
    }

    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::ObjectId => "objectid",
            Self::ObjectClass => "objectclass",
            Self::Lineage => "lineage",
            Self::CreationDate => "creation_date",
            Self::TerminationDate => "termination_date",
        }
    }

    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Id => DataType::Integer,
            Self::ObjectId | Self::ObjectClass | Self::Lineage => DataType::String,
            Self::CreationDate | Self::TerminationDate => DataType::Timestamp,
        }
    }
}

/// Attribute stored as typed rows of the `property` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMapping {
    pub name: QualifiedName,
    pub data_type: DataType,
    pub required: bool,
}

impl AttributeMapping {
    #[must_use]
    pub fn value_column(&self) -> &'static str {
        self.data_type.value_column()
    }
}

/// Mapping of one feature type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureTypeMapping {
    pub name: QualifiedName,
    pub top_level: bool,
    pub attributes: Vec<AttributeMapping>,
    pub geometries: Vec<QualifiedName>,
    /// Feature properties holding a child or a reference.
    pub children: Vec<QualifiedName>,
}

/// What a property reference resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyTarget {
    Column(CoreColumn),
    Attribute(AttributeMapping),
    Geometry(QualifiedName),
    Envelope,
}

impl PropertyTarget {
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Column(column) => column.data_type(),
            Self::Attribute(mapping) => mapping.data_type,
            Self::Geometry(_) => DataType::Geometry,
            Self::Envelope => DataType::Envelope,
        }
    }
}

/// Why a property reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    Unknown,
    /// The unqualified name matches properties with different data types.
    Ambiguous(Vec<QualifiedName>),
    /// The name is a feature property, which has no scalar value.
    FeatureProperty(QualifiedName),
}

/// Read-only schema metadata consulted by the compiler, importer and exporter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMapping {
    types: BTreeMap<QualifiedName, FeatureTypeMapping>,
}

impl SchemaMapping {
    /// Derives the mapping from the registered feature type configurations.
    #[must_use]
    pub fn from_registry(registry: &FeatureTypeRegistry) -> Self {
        let types = registry
            .configs()
            .map(|config| {
                let name = config.qualified_name();
                let mapping = FeatureTypeMapping {
                    name: name.clone(),
                    top_level: config.top_level,
                    attributes: config
                        .attributes
                        .iter()
                        .map(|spec| AttributeMapping {
                            name: QualifiedName::new(config.namespace, spec.name),
                            data_type: spec.data_type,
                            required: spec.required,
                        })
                        .collect(),
                    geometries: config
                        .geometries
                        .iter()
                        .chain(config.implicit_geometries)
                        .map(|geometry| QualifiedName::new(config.namespace, *geometry))
                        .collect(),
                    children: config
                        .children
                        .iter()
                        .map(|child| QualifiedName::new(config.namespace, *child))
                        .collect(),
                };
                (name, mapping)
            })
            .collect();
        Self { types }
    }

    #[must_use]
    pub fn feature_type(&self, name: &QualifiedName) -> Option<&FeatureTypeMapping> {
        self.types.get(name)
    }

    pub fn feature_types(&self) -> impl Iterator<Item = &FeatureTypeMapping> {
        self.types.values()
    }

    /// Resolves `namespace:name` (or an unqualified `name`) within the given
    /// feature types. An empty scope searches every registered type.
    ///
    /// Core columns and the envelope take precedence. A generic attribute
    /// (`gen:` namespace) resolves as a string attribute unless a type in
    /// scope declares it.
    pub fn resolve(
        &self,
        namespace: Option<&str>,
        name: &str,
        scope: &[QualifiedName],
    ) -> Result<PropertyTarget, ResolveError> {
        if namespace.map_or(true, |ns| ns == CORE_NAMESPACE) {
            if name == "envelope" {
                return Ok(PropertyTarget::Envelope);
            }
            if let Some(column) = CoreColumn::ALL
                .iter()
                .find(|column| column.property_name() == name)
            {
                return Ok(PropertyTarget::Column(*column));
            }
        }

        let in_scope: Vec<&FeatureTypeMapping> = if scope.is_empty() {
            self.types.values().collect()
        } else {
            scope.iter().filter_map(|name| self.types.get(name)).collect()
        };
        let matches_name = |candidate: &QualifiedName| {
            candidate.name == name && namespace.map_or(true, |ns| candidate.namespace == ns)
        };

        let mut attributes: Vec<&AttributeMapping> = Vec::new();
        for mapping in &in_scope {
            for attribute in mapping.attributes.iter().filter(|a| matches_name(&a.name)) {
                if !attributes.contains(&attribute) {
                    attributes.push(attribute);
                }
            }
        }
        if let Some(first) = attributes.first() {
            let conflicting = attributes
                .iter()
                .any(|a| a.name != first.name || a.data_type != first.data_type);
            if conflicting {
                return Err(ResolveError::Ambiguous(
                    attributes.iter().map(|a| a.name.clone()).collect(),
                ));
            }
            return Ok(PropertyTarget::Attribute((*first).clone()));
        }

        let geometry = in_scope
            .iter()
            .flat_map(|mapping| mapping.geometries.iter())
            .find(|geometry| matches_name(geometry));
        if let Some(geometry) = geometry {
            return Ok(PropertyTarget::Geometry(geometry.clone()));
        }

        let child = in_scope
            .iter()
            .flat_map(|mapping| mapping.children.iter())
            .find(|child| matches_name(child));
        if let Some(child) = child {
            return Err(ResolveError::FeatureProperty(child.clone()));
        }

        if namespace == Some(GENERIC_NAMESPACE) {
            return Ok(PropertyTarget::Attribute(AttributeMapping {
                name: QualifiedName::new(GENERIC_NAMESPACE, name),
                data_type: DataType::String,
                required: false,
            }));
        }

        Err(ResolveError::Unknown)
    }
}
