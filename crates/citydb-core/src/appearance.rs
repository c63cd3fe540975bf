use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::{ObjectId, QualifiedName};

/// Material or texture data applied to target surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SurfaceData {
    #[serde(rename_all = "camelCase")]
    Material {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diffuse_color: Option<[f64; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transparency: Option<f64>,
        #[serde(default)]
        targets: Vec<ObjectId>,
    },
    #[serde(rename_all = "camelCase")]
    Texture {
        image_uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default)]
        targets: Vec<ObjectId>,
    },
}

/// Appearance shareable across features and geometries.
#[derive(Debug, Clone, PartialEq)]
pub struct Appearance {
    pub object_id: ObjectId,
    pub theme: Option<String>,
    pub surface_data: Vec<SurfaceData>,
}

impl Appearance {
    #[must_use]
    pub fn new(object_id: impl Into<ObjectId>, theme: Option<&str>) -> Self {
        Self {
            object_id: object_id.into(),
            theme: theme.map(str::to_string),
            surface_data: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_surface_data(mut self, data: SurfaceData) -> Self {
        self.surface_data.push(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppearanceValue {
    Inline(Arc<Appearance>),
    Reference(ObjectId),
}

impl AppearanceValue {
    #[must_use]
    pub fn object_id(&self) -> &ObjectId {
        match self {
            Self::Inline(appearance) => &appearance.object_id,
            Self::Reference(object_id) => object_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppearanceProperty {
    pub name: QualifiedName,
    pub value: AppearanceValue,
}

impl AppearanceProperty {
    #[must_use]
    pub fn inline(appearance: Arc<Appearance>) -> Self {
        Self {
            name: QualifiedName::new("app", "appearance"),
            value: AppearanceValue::Inline(appearance),
        }
    }

    #[must_use]
    pub fn reference(target: impl Into<ObjectId>) -> Self {
        Self {
            name: QualifiedName::new("app", "appearance"),
            value: AppearanceValue::Reference(target.into()),
        }
    }
}
