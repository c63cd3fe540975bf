use crate::registry::FeatureTypeRegistry;
use crate::schema::SchemaMapping;

/// Metadata a database adapter exposes to the query compiler and to the
/// import, export and delete operations.
pub trait AdapterMetadata: Send + Sync {
    /// Maximum number of rows or ids submitted to the database in one batch.
    fn maximum_batch_size(&self) -> usize;

    /// Schema used to resolve filter property references.
    fn schema_mapping(&self) -> &SchemaMapping;

    /// Feature type handlers used when writing and rebuilding features.
    fn registry(&self) -> &FeatureTypeRegistry;
}
