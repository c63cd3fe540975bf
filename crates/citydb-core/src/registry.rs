//! Explicit registry mapping feature type tags to their handlers.
//!
//! Every supported feature type is described by a declarative [`TypeConfig`]
//! (allowed LODs, declared attributes, geometry and child property names).
//! A single generic routine checks features against that configuration when
//! they are written and after they are rebuilt from rows, so adding a feature
//! type means adding a table entry rather than a new code path.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ModelError, ModelResult};
use crate::feature::Feature;
use crate::ids::QualifiedName;
use crate::value::DataType;

/// Namespace whose attributes are accepted on every feature type.
pub const GENERIC_NAMESPACE: &str = "gen";

/// Declared attribute of a feature type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub data_type: DataType,
    pub required: bool,
}

impl AttributeSpec {
    #[must_use]
    pub const fn optional(name: &'static str, data_type: DataType) -> Self {
        Self {
            name,
            data_type,
            required: false,
        }
    }

    #[must_use]
    pub const fn required(name: &'static str, data_type: DataType) -> Self {
        Self {
            name,
            data_type,
            required: true,
        }
    }
}

/// Declarative description of one feature type.
#[derive(Debug, Clone, Copy)]
pub struct TypeConfig {
    pub namespace: &'static str,
    pub name: &'static str,
    /// Whether instances are exported as roots.
    pub top_level: bool,
    pub lods: &'static [&'static str],
    pub attributes: &'static [AttributeSpec],
    pub geometries: &'static [&'static str],
    pub implicit_geometries: &'static [&'static str],
    /// Names of feature-valued properties (contained children and references).
    pub children: &'static [&'static str],
    pub appearances: bool,
}

impl TypeConfig {
    #[must_use]
    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(self.namespace, self.name)
    }

    /// Looks up a declared attribute by qualified name.
    #[must_use]
    pub fn attribute(&self, name: &QualifiedName) -> Option<&AttributeSpec> {
        if name.namespace != self.namespace {
            return None;
        }
        self.attributes.iter().find(|spec| spec.name == name.name)
    }

    fn declares(list: &[&str], namespace: &str, name: &QualifiedName) -> bool {
        name.namespace == namespace && list.contains(&name.name.as_str())
    }
}

/// Per-type hooks invoked when a feature is written to or rebuilt from the
/// database.
pub trait FeatureHandler: Send + Sync {
    fn config(&self) -> &TypeConfig;

    /// Checks a feature supplied by a format reader before it is written.
    fn prepare(&self, feature: &Feature) -> ModelResult<()> {
        check_declared(self.config(), feature)?;
        check_required(self.config(), feature)
    }

    /// Checks a feature rebuilt from database rows before it is handed to a
    /// format writer.
    fn finish(&self, feature: &Feature) -> ModelResult<()> {
        check_required(self.config(), feature)
    }
}

/// Handler driven purely by its [`TypeConfig`].
#[derive(Debug, Clone, Copy)]
pub struct GenericFeatureHandler {
    config: &'static TypeConfig,
}

impl GenericFeatureHandler {
    #[must_use]
    pub const fn new(config: &'static TypeConfig) -> Self {
        Self { config }
    }
}

impl FeatureHandler for GenericFeatureHandler {
    fn config(&self) -> &TypeConfig {
        self.config
    }
}

fn check_declared(config: &TypeConfig, feature: &Feature) -> ModelResult<()> {
    let feature_type = feature.feature_type.to_string();
    let undeclared = |property: &QualifiedName| ModelError::UndeclaredProperty {
        feature_type: feature_type.clone(),
        property: property.to_string(),
    };
    let check_lod = |property: &QualifiedName, lod: Option<&String>| match lod {
        Some(lod) if !config.lods.contains(&lod.as_str()) => Err(ModelError::UnsupportedLod {
            feature_type: feature_type.clone(),
            property: property.to_string(),
            lod: lod.clone(),
        }),
        _ => Ok(()),
    };

    for attribute in &feature.attributes {
        if attribute.name.namespace == GENERIC_NAMESPACE {
            continue;
        }
        let spec = config
            .attribute(&attribute.name)
            .ok_or_else(|| undeclared(&attribute.name))?;
        let found = attribute.value.data_type();
        if found != spec.data_type {
            return Err(ModelError::AttributeType {
                attribute: attribute.name.to_string(),
                expected: spec.data_type,
                found,
            });
        }
    }

    for property in &feature.geometries {
        if !TypeConfig::declares(config.geometries, config.namespace, &property.name) {
            return Err(undeclared(&property.name));
        }
        check_lod(&property.name, property.lod.as_ref())?;
    }

    for property in &feature.implicit_geometries {
        if !TypeConfig::declares(config.implicit_geometries, config.namespace, &property.name) {
            return Err(undeclared(&property.name));
        }
        check_lod(&property.name, property.lod.as_ref())?;
    }

    if !config.appearances {
        if let Some(property) = feature.appearances.first() {
            return Err(undeclared(&property.name));
        }
    }

    for property in &feature.children {
        if !TypeConfig::declares(config.children, config.namespace, &property.name) {
            return Err(undeclared(&property.name));
        }
    }

    Ok(())
}

fn check_required(config: &TypeConfig, feature: &Feature) -> ModelResult<()> {
    for spec in config.attributes.iter().filter(|spec| spec.required) {
        let present = feature
            .attributes
            .iter()
            .any(|attribute| attribute.name.is(config.namespace, spec.name));
        if !present {
            return Err(ModelError::MissingRequired {
                feature_type: feature.feature_type.to_string(),
                attribute: spec.name.to_string(),
            });
        }
    }
    Ok(())
}

/// Registry of feature type handlers, populated once at startup.
#[derive(Clone, Default)]
pub struct FeatureTypeRegistry {
    handlers: BTreeMap<QualifiedName, Arc<dyn FeatureHandler>>,
}

impl fmt::Debug for FeatureTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureTypeRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FeatureTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the built-in feature types.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::from_configs(DEFAULT_FEATURE_TYPES)
    }

    /// Registers a [`GenericFeatureHandler`] for every config in the table.
    #[must_use]
    pub fn from_configs(configs: &'static [TypeConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Arc::new(GenericFeatureHandler::new(config)));
        }
        registry
    }

    /// Registers (or replaces) the handler for its configured type.
    pub fn register(&mut self, handler: Arc<dyn FeatureHandler>) {
        self.handlers
            .insert(handler.config().qualified_name(), handler);
    }

    pub fn handler(&self, feature_type: &QualifiedName) -> ModelResult<&Arc<dyn FeatureHandler>> {
        self.handlers
            .get(feature_type)
            .ok_or_else(|| ModelError::UnknownFeatureType(feature_type.to_string()))
    }

    #[must_use]
    pub fn config(&self, feature_type: &QualifiedName) -> Option<&TypeConfig> {
        self.handlers.get(feature_type).map(|handler| handler.config())
    }

    pub fn configs(&self) -> impl Iterator<Item = &TypeConfig> {
        self.handlers.values().map(|handler| handler.config())
    }

    /// Runs [`FeatureHandler::prepare`] over the feature and its inline children.
    pub fn prepare(&self, feature: &Feature) -> ModelResult<()> {
        self.handler(&feature.feature_type)?.prepare(feature)?;
        feature
            .child_features()
            .try_for_each(|child| self.prepare(child))
    }

    /// Runs [`FeatureHandler::finish`] over the feature and its inline children.
    pub fn finish(&self, feature: &Feature) -> ModelResult<()> {
        self.handler(&feature.feature_type)?.finish(feature)?;
        feature
            .child_features()
            .try_for_each(|child| self.finish(child))
    }
}

const ALL_LODS: &[&str] = &["0", "1", "2", "3", "4"];

const BUILDING_ATTRIBUTES: &[AttributeSpec] = &[
    AttributeSpec::optional("class", DataType::Code),
    AttributeSpec::optional("function", DataType::Code),
    AttributeSpec::optional("usage", DataType::Code),
    AttributeSpec::optional("roofType", DataType::Code),
    AttributeSpec::optional("yearOfConstruction", DataType::Integer),
    AttributeSpec::optional("measuredHeight", DataType::Measure),
    AttributeSpec::optional("storeysAboveGround", DataType::Integer),
    AttributeSpec::optional("storeysBelowGround", DataType::Integer),
];

const BUILDING_GEOMETRIES: &[&str] = &[
    "lod0FootPrint",
    "lod0RoofEdge",
    "lod1Solid",
    "lod1MultiSurface",
    "lod2Solid",
    "lod2MultiSurface",
    "lod3Solid",
    "lod3MultiSurface",
    "lod4Solid",
    "lod4MultiSurface",
];

const BOUNDARY_GEOMETRIES: &[&str] = &[
    "lod2MultiSurface",
    "lod3MultiSurface",
    "lod4MultiSurface",
];

const CLASSIFIERS: &[AttributeSpec] = &[
    AttributeSpec::optional("class", DataType::Code),
    AttributeSpec::optional("function", DataType::Code),
    AttributeSpec::optional("usage", DataType::Code),
];

const IMPLICIT_REPRESENTATIONS: &[&str] = &[
    "lod1ImplicitRepresentation",
    "lod2ImplicitRepresentation",
    "lod3ImplicitRepresentation",
    "lod4ImplicitRepresentation",
];

const fn boundary_surface(name: &'static str) -> TypeConfig {
    TypeConfig {
        namespace: "bldg",
        name,
        top_level: false,
        lods: &["2", "3", "4"],
        attributes: &[],
        geometries: BOUNDARY_GEOMETRIES,
        implicit_geometries: &[],
        children: &[],
        appearances: true,
    }
}

/// Built-in feature types.
pub static DEFAULT_FEATURE_TYPES: &[TypeConfig] = &[
    TypeConfig {
        namespace: "bldg",
        name: "Building",
        top_level: true,
        lods: ALL_LODS,
        attributes: BUILDING_ATTRIBUTES,
        geometries: BUILDING_GEOMETRIES,
        implicit_geometries: &[],
        children: &["boundary", "buildingPart", "buildingInstallation", "relatedTo"],
        appearances: true,
    },
    TypeConfig {
        namespace: "bldg",
        name: "BuildingPart",
        top_level: false,
        lods: ALL_LODS,
        attributes: BUILDING_ATTRIBUTES,
        geometries: BUILDING_GEOMETRIES,
        implicit_geometries: &[],
        children: &["boundary", "buildingPart", "buildingInstallation"],
        appearances: true,
    },
    TypeConfig {
        namespace: "bldg",
        name: "BuildingInstallation",
        top_level: false,
        lods: &["2", "3", "4"],
        attributes: CLASSIFIERS,
        geometries: &["lod2Geometry", "lod3Geometry", "lod4Geometry"],
        implicit_geometries: IMPLICIT_REPRESENTATIONS,
        children: &["boundary"],
        appearances: true,
    },
    boundary_surface("WallSurface"),
    boundary_surface("RoofSurface"),
    boundary_surface("GroundSurface"),
    TypeConfig {
        namespace: "luse",
        name: "LandUse",
        top_level: true,
        lods: ALL_LODS,
        attributes: CLASSIFIERS,
        geometries: &[
            "lod0MultiSurface",
            "lod1MultiSurface",
            "lod2MultiSurface",
            "lod3MultiSurface",
            "lod4MultiSurface",
        ],
        implicit_geometries: &[],
        children: &[],
        appearances: true,
    },
    TypeConfig {
        namespace: "tran",
        name: "Road",
        top_level: true,
        lods: ALL_LODS,
        attributes: CLASSIFIERS,
        geometries: &[
            "lod0Network",
            "lod1MultiSurface",
            "lod2MultiSurface",
            "lod3MultiSurface",
            "lod4MultiSurface",
        ],
        implicit_geometries: &[],
        children: &["trafficArea", "auxiliaryTrafficArea"],
        appearances: true,
    },
    TypeConfig {
        namespace: "tran",
        name: "TrafficArea",
        top_level: false,
        lods: &["2", "3", "4"],
        attributes: &[
            AttributeSpec::optional("function", DataType::Code),
            AttributeSpec::optional("usage", DataType::Code),
            AttributeSpec::optional("surfaceMaterial", DataType::Code),
        ],
        geometries: &["lod2MultiSurface", "lod3MultiSurface", "lod4MultiSurface"],
        implicit_geometries: &[],
        children: &[],
        appearances: true,
    },
    TypeConfig {
        namespace: "veg",
        name: "SolitaryVegetationObject",
        top_level: true,
        lods: &["1", "2", "3", "4"],
        attributes: &[
            AttributeSpec::optional("class", DataType::Code),
            AttributeSpec::optional("species", DataType::Code),
            AttributeSpec::optional("height", DataType::Measure),
            AttributeSpec::optional("trunkDiameter", DataType::Measure),
            AttributeSpec::optional("crownDiameter", DataType::Measure),
        ],
        geometries: &["lod1Geometry", "lod2Geometry", "lod3Geometry", "lod4Geometry"],
        implicit_geometries: IMPLICIT_REPRESENTATIONS,
        children: &[],
        appearances: true,
    },
    TypeConfig {
        namespace: "frn",
        name: "CityFurniture",
        top_level: true,
        lods: &["1", "2", "3", "4"],
        attributes: CLASSIFIERS,
        geometries: &["lod1Geometry", "lod2Geometry", "lod3Geometry", "lod4Geometry"],
        implicit_geometries: IMPLICIT_REPRESENTATIONS,
        children: &[],
        appearances: true,
    },
    TypeConfig {
        namespace: "gen",
        name: "GenericCityObject",
        top_level: true,
        lods: ALL_LODS,
        attributes: CLASSIFIERS,
        geometries: &[
            "lod0Geometry",
            "lod1Geometry",
            "lod2Geometry",
            "lod3Geometry",
            "lod4Geometry",
        ],
        implicit_geometries: IMPLICIT_REPRESENTATIONS,
        children: &[],
        appearances: true,
    },
];
