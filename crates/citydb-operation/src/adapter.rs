//! Database adapter contract and its SQLite implementation.

use async_trait::async_trait;
use citydb_core::{AdapterMetadata, DatabaseConfig, FeatureTypeRegistry, SchemaMapping};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tracing::info;

use crate::error::OperationResult;
use crate::util::{create_sqlite_pool, run_migrations};

/// Capability surface the importer, exporter and deleter consume.
#[async_trait]
pub trait DatabaseAdapter: AdapterMetadata {
    /// Acquires a dedicated connection for one operation instance. The
    /// connection returns to the pool when dropped.
    async fn connection(&self) -> Result<PoolConnection<Sqlite>, sqlx::Error>;
}

/// Adapter backed by a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    pool: SqlitePool,
    registry: FeatureTypeRegistry,
    schema: SchemaMapping,
    max_batch_size: usize,
}

impl SqliteAdapter {
    /// Opens the configured database and applies the bundled migrations.
    pub async fn connect(config: &DatabaseConfig) -> OperationResult<Self> {
        let pool = create_sqlite_pool(&config.url, config.max_connections).await?;
        run_migrations(&pool).await?;
        info!(url = %config.url, "opened citydb database");
        Ok(Self::new(pool, config.max_batch_size))
    }

    /// Adapter over an existing pool using the built-in feature types.
    #[must_use]
    pub fn new(pool: SqlitePool, max_batch_size: usize) -> Self {
        Self::with_registry(pool, FeatureTypeRegistry::with_defaults(), max_batch_size)
    }

    #[must_use]
    pub fn with_registry(
        pool: SqlitePool,
        registry: FeatureTypeRegistry,
        max_batch_size: usize,
    ) -> Self {
        let schema = SchemaMapping::from_registry(&registry);
        Self {
            pool,
            registry,
            schema,
            max_batch_size: max_batch_size.max(1),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl AdapterMetadata for SqliteAdapter {
    fn maximum_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn schema_mapping(&self) -> &SchemaMapping {
        &self.schema
    }

    fn registry(&self) -> &FeatureTypeRegistry {
        &self.registry
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    async fn connection(&self) -> Result<PoolConnection<Sqlite>, sqlx::Error> {
        self.pool.acquire().await
    }
}
