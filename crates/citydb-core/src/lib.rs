//! Core domain types for citydb: the feature object model, schema metadata,
//! the feature type registry and shared configuration.

pub mod appearance;
pub mod config;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod ids;
pub mod lod;
pub mod preprocess;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod value;

pub use appearance::{Appearance, AppearanceProperty, AppearanceValue, SurfaceData};
pub use config::{
    CitydbConfig, DatabaseConfig, DeleteConfig, DeleteMode, ExportConfig, ImportConfig, ImportMode,
    QueryConfig, RetryConfig,
};
pub use error::{CoreError, ModelError, ModelResult};
pub use feature::{Attribute, Feature, FeatureProperty, FeatureValue};
pub use geometry::{
    Envelope, Geometry, GeometryProperty, GeometryType, GeometryValue, ImplicitGeometry,
    ImplicitGeometryProperty, ImplicitGeometryValue,
};
pub use ids::{ObjectId, QualifiedName};
pub use lod::{LodFilter, LodMode};
pub use preprocess::{DeprecatedEncoding, Preprocessor};
pub use registry::{
    AttributeSpec, FeatureHandler, FeatureTypeRegistry, GenericFeatureHandler, TypeConfig,
    DEFAULT_FEATURE_TYPES, GENERIC_NAMESPACE,
};
pub use schema::{
    AttributeMapping, CoreColumn, FeatureTypeMapping, PropertyTarget, ResolveError, SchemaMapping,
    CORE_NAMESPACE,
};
pub use traits::AdapterMetadata;
pub use value::{date_timestamp, format_timestamp, parse_timestamp, DataType, TypeFamily, Value};
