use citydb_core::{CoreError, ModelError};
use citydb_query::CompileError;
use thiserror::Error;

/// Failure of an import, export or delete operation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// A database statement failed while flushing a batch.
    #[error("batch {batch} failed while writing `{object_id}`: {source}")]
    Storage {
        /// Zero-based index of the batch within the operation.
        batch: usize,
        /// Object id owning the failing row, or the database id for deletes.
        object_id: String,
        #[source]
        source: sqlx::Error,
    },

    /// A read or lookup statement failed outside of a batch.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A feature could not be written or rebuilt.
    #[error("feature `{object_id}`: {source}")]
    Model {
        object_id: String,
        #[source]
        source: ModelError,
    },

    /// A referenced object id was found neither in the session nor in the
    /// database once the referencing root was complete.
    #[error("`{referenced_by}` references unknown object `{object_id}`")]
    UnresolvedReference {
        object_id: String,
        referenced_by: String,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The operation was cancelled between two batches.
    #[error("operation cancelled")]
    Cancelled,
}

impl OperationError {
    pub(crate) fn model(object_id: impl ToString, source: ModelError) -> Self {
        Self::Model {
            object_id: object_id.to_string(),
            source,
        }
    }

    /// Object id the fault is attributed to, if any.
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Self::Storage { object_id, .. }
            | Self::Model { object_id, .. }
            | Self::UnresolvedReference {
                referenced_by: object_id,
                ..
            } => Some(object_id),
            Self::Core(CoreError::NotFound { id, .. }) => Some(id),
            _ => None,
        }
    }

    /// Whether the fault concerns one object only, so a run over many
    /// objects may record it and continue.
    #[must_use]
    pub fn is_object_fault(&self) -> bool {
        matches!(
            self,
            Self::Model { .. } | Self::Core(CoreError::NotFound { .. })
        )
    }

    /// Batch index of a storage fault.
    #[must_use]
    pub fn batch(&self) -> Option<usize> {
        match self {
            Self::Storage { batch, .. } => Some(*batch),
            _ => None,
        }
    }
}

/// Result alias for operations.
pub type OperationResult<T> = Result<T, OperationError>;
