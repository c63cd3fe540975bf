//! Per-run options of the importer, exporter and deleter.

use citydb_core::{
    CitydbConfig, DeleteConfig, DeleteMode, ExportConfig, ImportConfig, ImportMode, RetryConfig,
};

use crate::cancel::Cancellation;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// Lineage template applied to features without their own lineage.
    /// `@file@`, `@date@` and `@session@` are substituted once per session.
    pub lineage: Option<String>,
    /// Source file name substituted for `@file@`.
    pub source_file: Option<String>,
    pub retry: RetryConfig,
    pub cancellation: Cancellation,
}

impl ImportOptions {
    #[must_use]
    pub fn with_mode(mut self, mode: ImportMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_lineage(mut self, template: impl Into<String>) -> Self {
        self.lineage = Some(template.into());
        self
    }

    #[must_use]
    pub fn with_source_file(mut self, file: impl Into<String>) -> Self {
        self.source_file = Some(file.into());
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

impl From<&ImportConfig> for ImportOptions {
    fn from(config: &ImportConfig) -> Self {
        Self {
            mode: config.mode,
            lineage: config.lineage.clone(),
            source_file: None,
            retry: config.retry.clone(),
            cancellation: Cancellation::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Hard bound on contained child recursion.
    pub max_hierarchy_depth: u32,
    pub cancellation: Cancellation,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ExportOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            max_hierarchy_depth: config.max_hierarchy_depth,
            cancellation: Cancellation::default(),
        }
    }
}

impl ExportOptions {
    #[must_use]
    pub fn with_max_hierarchy_depth(mut self, depth: u32) -> Self {
        self.max_hierarchy_depth = depth;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub mode: DeleteMode,
    pub retry: RetryConfig,
    pub cancellation: Cancellation,
}

impl DeleteOptions {
    #[must_use]
    pub fn with_mode(mut self, mode: DeleteMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

impl From<&DeleteConfig> for DeleteOptions {
    fn from(config: &DeleteConfig) -> Self {
        Self {
            mode: config.mode,
            retry: config.retry.clone(),
            cancellation: Cancellation::default(),
        }
    }
}

impl From<&CitydbConfig> for ImportOptions {
    fn from(config: &CitydbConfig) -> Self {
        Self::from(&config.import)
    }
}

impl From<&CitydbConfig> for ExportOptions {
    fn from(config: &CitydbConfig) -> Self {
        Self::from(&config.export)
    }
}

impl From<&CitydbConfig> for DeleteOptions {
    fn from(config: &CitydbConfig) -> Self {
        Self::from(&config.delete)
    }
}
