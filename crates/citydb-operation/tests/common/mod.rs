//! Shared fixtures for the operation integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use citydb_core::{Feature, FeatureTypeRegistry, Geometry, QualifiedName};
use citydb_operation::{create_sqlite_pool, run_migrations, SqliteAdapter};
use sqlx::SqlitePool;
use uuid::Uuid;

pub async fn setup_pool() -> SqlitePool {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let db_path = temp_db_path();
    let database_url = format!("sqlite://{}", db_path.display());
    let pool = create_sqlite_pool(&database_url, 4)
        .await
        .expect("failed to create pool");
    run_migrations(&pool).await.expect("failed migrations");
    pool
}

pub async fn setup_adapter(max_batch_size: usize) -> SqliteAdapter {
    SqliteAdapter::new(setup_pool().await, max_batch_size)
}

pub async fn setup_adapter_with(registry: FeatureTypeRegistry) -> SqliteAdapter {
    SqliteAdapter::with_registry(setup_pool().await, registry, 100)
}

fn temp_db_path() -> PathBuf {
    let filename = format!("citydb-operation-test-{}.db", Uuid::now_v7());
    std::env::temp_dir().join(filename)
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count rows")
}

pub fn bldg(name: &str) -> QualifiedName {
    QualifiedName::new("bldg", name)
}

pub fn gen(name: &str) -> QualifiedName {
    QualifiedName::new("gen", name)
}

/// Unit square at height `z`, shifted by `offset` along x.
pub fn square(offset: f64, z: f64) -> Geometry {
    Geometry::multi_surface(&[vec![
        [offset, 0.0, z],
        [offset + 1.0, 0.0, z],
        [offset + 1.0, 1.0, z],
        [offset, 1.0, z],
        [offset, 0.0, z],
    ]])
}

/// Building with one LOD geometry per entry of `lods`.
pub fn building(object_id: &str, lods: &[&str]) -> Feature {
    lods.iter().enumerate().fold(
        Feature::new(object_id, bldg("Building")),
        |feature, (index, lod)| {
            feature.with_geometry(
                bldg(&format!("lod{lod}MultiSurface")),
                Some(lod),
                square(index as f64, 0.0),
            )
        },
    )
}

pub fn wall(object_id: &str) -> Feature {
    Feature::new(object_id, bldg("WallSurface")).with_geometry(
        bldg("lod2MultiSurface"),
        Some("2"),
        square(0.0, 3.0),
    )
}
