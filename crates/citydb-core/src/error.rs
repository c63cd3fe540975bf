use thiserror::Error;

use crate::value::DataType;

/// Error for core lookups that are not tied to a single feature.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"feature"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Operation violates current state rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

/// A feature or one of its properties cannot be built from, or serialized to,
/// the feature object model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// No handler is registered for the feature type.
    #[error("unknown feature type `{0}`")]
    UnknownFeatureType(String),

    /// The property is not declared for the feature type.
    #[error("property `{property}` is not declared for feature type `{feature_type}`")]
    UndeclaredProperty {
        /// Feature type tag.
        feature_type: String,
        /// Offending property name.
        property: String,
    },

    /// Attribute value does not match the declared data type.
    #[error("attribute `{attribute}` expects {expected:?} but found {found:?}")]
    AttributeType {
        /// Attribute name.
        attribute: String,
        /// Declared data type.
        expected: DataType,
        /// Data type of the supplied value.
        found: DataType,
    },

    /// A non-optional attribute is missing.
    #[error("feature type `{feature_type}` requires attribute `{attribute}`")]
    MissingRequired {
        /// Feature type tag.
        feature_type: String,
        /// Missing attribute name.
        attribute: String,
    },

    /// The LOD tag is not supported by the feature type.
    #[error("property `{property}` uses LOD {lod} which is not supported by `{feature_type}`")]
    UnsupportedLod {
        /// Feature type tag.
        feature_type: String,
        /// Geometry property name.
        property: String,
        /// Offending LOD tag.
        lod: String,
    },

    /// Geometry coordinates are malformed.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A stored value could not be decoded.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Result alias for model-level operations.
pub type ModelResult<T> = Result<T, ModelError>;
